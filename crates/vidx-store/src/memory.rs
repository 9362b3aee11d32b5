//! In-process media store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use vidx_models::{
    Caption, EmbeddingKind, MediaStats, NewCaption, NewScene, NewVideo, Scene, SceneId, Video,
    VideoId, VideoStatus,
};

use crate::error::{StoreError, StoreResult};
use crate::lexical;
use crate::store::{
    MediaStore, Page, Precision, SceneFilter, SceneWithVideo, ScoredScene, VideoPatch,
};

#[derive(Default)]
struct State {
    videos: BTreeMap<i64, Video>,
    scenes: BTreeMap<i64, Scene>,
    captions: BTreeMap<i64, Caption>,
    next_video_id: i64,
    next_scene_id: i64,
    next_caption_id: i64,
}

/// Media store held in memory, for tests and single-process runs.
pub struct MemoryMediaStore {
    state: Mutex<State>,
    embedding_dim: usize,
}

impl Default for MemoryMediaStore {
    fn default() -> Self {
        Self::new(512)
    }
}

impl MemoryMediaStore {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            embedding_dim,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_dim(&self, v: &[f32]) -> StoreResult<()> {
        if v.len() != self.embedding_dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.embedding_dim,
                actual: v.len(),
            });
        }
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

fn similarity(scene: &Scene, query: &[f32], kind: EmbeddingKind) -> Option<f32> {
    match kind {
        EmbeddingKind::Text => scene.text_embedding.as_deref().map(|t| cosine(t, query)),
        EmbeddingKind::Visual => scene.visual_embedding.as_deref().map(|v| cosine(v, query)),
        EmbeddingKind::Combined => {
            let t = scene.text_embedding.as_deref()?;
            let v = scene.visual_embedding.as_deref()?;
            Some((cosine(t, query) + cosine(v, query)) / 2.0)
        }
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn create_video(&self, video: NewVideo) -> StoreResult<Video> {
        let mut state = self.lock();
        state.next_video_id += 1;
        let now = Utc::now();
        let created = Video {
            id: VideoId(state.next_video_id),
            filename: video.filename,
            filepath: video.filepath,
            content_hash: None,
            title: video.title,
            tags: vidx_models::normalize_tags(video.tags),
            metadata: video.metadata,
            status: VideoStatus::Pending,
            scene_count: 0,
            caption_count: 0,
            embedding_model: None,
            duration: 0.0,
            error_message: None,
            created_at: now,
            updated_at: now,
            last_processed_at: None,
        };
        state.videos.insert(created.id.0, created.clone());
        Ok(created)
    }

    async fn get_video(&self, id: VideoId) -> StoreResult<Video> {
        self.lock()
            .videos
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::video_not_found(id))
    }

    async fn list_videos(&self, page: Page) -> StoreResult<Vec<Video>> {
        let page = Page::clamped(Some(page.limit), Some(page.offset));
        let state = self.lock();
        let mut videos: Vec<&Video> = state.videos.values().collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(videos
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn count_videos(&self) -> StoreResult<i64> {
        Ok(self.lock().videos.len() as i64)
    }

    async fn update_video(&self, id: VideoId, patch: VideoPatch) -> StoreResult<Video> {
        let mut state = self.lock();
        let video = state
            .videos
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::video_not_found(id))?;
        let now = Utc::now();
        if let Some(status) = patch.status {
            video.status = status;
        }
        if let Some(title) = patch.title {
            video.title = Some(title);
        }
        if let Some(duration) = patch.duration {
            video.duration = duration;
        }
        if let Some(error) = patch.error_message {
            video.error_message = error;
        }
        if let Some(metadata) = patch.metadata {
            video.metadata.extend(metadata);
        }
        if let Some(model) = patch.embedding_model {
            video.embedding_model = Some(model);
        }
        if patch.touch_processed {
            video.last_processed_at = Some(now);
        }
        video.updated_at = now;
        Ok(video.clone())
    }

    async fn set_content_hash(&self, id: VideoId, hash: &str) -> StoreResult<()> {
        let mut state = self.lock();
        if let Some(existing) = state
            .videos
            .values()
            .find(|v| v.id != id && v.content_hash.as_deref() == Some(hash))
        {
            return Err(StoreError::DuplicateContent {
                existing_video_id: existing.id,
            });
        }
        let video = state
            .videos
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::video_not_found(id))?;
        video.content_hash = Some(hash.to_string());
        video.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_if_embedded(&self, id: VideoId) -> StoreResult<bool> {
        let mut state = self.lock();
        let mut scenes = state.scenes.values().filter(|s| s.video_id == id).peekable();
        let ready = scenes.peek().is_some() && scenes.all(|s| s.has_embeddings());
        let video = state
            .videos
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::video_not_found(id))?;
        if !ready || video.status == VideoStatus::Completed {
            return Ok(false);
        }
        let now = Utc::now();
        video.status = VideoStatus::Completed;
        video.error_message = None;
        video.last_processed_at = Some(now);
        video.updated_at = now;
        Ok(true)
    }

    async fn delete_video(&self, id: VideoId) -> StoreResult<()> {
        let mut state = self.lock();
        if state.videos.remove(&id.0).is_none() {
            return Err(StoreError::video_not_found(id));
        }
        state.scenes.retain(|_, s| s.video_id != id);
        state.captions.retain(|_, c| c.video_id != id);
        Ok(())
    }

    async fn upsert_scenes(&self, video_id: VideoId, scenes: &[NewScene]) -> StoreResult<Vec<Scene>> {
        let mut state = self.lock();
        if !state.videos.contains_key(&video_id.0) {
            return Err(StoreError::video_not_found(video_id));
        }

        let mut stored = Vec::with_capacity(scenes.len());
        for new in scenes {
            let existing = state
                .scenes
                .values()
                .find(|s| s.video_id == video_id && s.scene_index == new.scene_index)
                .map(|s| s.id.0);
            let id = match existing {
                Some(id) => id,
                None => {
                    state.next_scene_id += 1;
                    let id = state.next_scene_id;
                    state.scenes.insert(
                        id,
                        Scene {
                            id: SceneId(id),
                            video_id,
                            scene_index: new.scene_index,
                            start_time: new.start_time,
                            end_time: new.end_time,
                            keyframe_path: None,
                            caption: None,
                            visual_embedding: None,
                            text_embedding: None,
                            created_at: Utc::now(),
                        },
                    );
                    id
                }
            };
            if let Some(scene) = state.scenes.get_mut(&id) {
                scene.start_time = new.start_time;
                scene.end_time = new.end_time;
                if new.keyframe_path.is_some() {
                    scene.keyframe_path = new.keyframe_path.clone();
                }
                stored.push(scene.clone());
            }
        }

        let count = scenes.len() as i32;
        state
            .scenes
            .retain(|_, s| s.video_id != video_id || s.scene_index < count);
        let State {
            scenes: kept,
            captions,
            ..
        } = &mut *state;
        for caption in captions.values_mut().filter(|c| c.video_id == video_id) {
            if caption.scene_id.is_some_and(|id| !kept.contains_key(&id.0)) {
                caption.scene_id = None;
            }
        }
        if let Some(video) = state.videos.get_mut(&video_id.0) {
            video.scene_count = count;
            video.updated_at = Utc::now();
        }
        Ok(stored)
    }

    async fn scenes_for_video(&self, video_id: VideoId) -> StoreResult<Vec<Scene>> {
        let state = self.lock();
        let mut scenes: Vec<Scene> = state
            .scenes
            .values()
            .filter(|s| s.video_id == video_id)
            .cloned()
            .collect();
        scenes.sort_by_key(|s| s.scene_index);
        Ok(scenes)
    }

    async fn set_scene_keyframe(&self, id: SceneId, path: &str) -> StoreResult<()> {
        let mut state = self.lock();
        let scene = state
            .scenes
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::scene_not_found(id))?;
        scene.keyframe_path = Some(path.to_string());
        Ok(())
    }

    async fn set_scene_caption(&self, id: SceneId, caption: &str) -> StoreResult<()> {
        let mut state = self.lock();
        let scene = state
            .scenes
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::scene_not_found(id))?;
        scene.caption = Some(caption.to_string());
        Ok(())
    }

    async fn replace_captions(&self, video_id: VideoId, captions: &[NewCaption]) -> StoreResult<i32> {
        let mut state = self.lock();
        if !state.videos.contains_key(&video_id.0) {
            return Err(StoreError::video_not_found(video_id));
        }
        state.captions.retain(|_, c| c.video_id != video_id);

        let now = Utc::now();
        for new in captions {
            state.next_caption_id += 1;
            let id = state.next_caption_id;
            state.captions.insert(
                id,
                Caption {
                    id,
                    video_id,
                    scene_id: new.scene_id,
                    start_time: new.start_time,
                    end_time: new.end_time,
                    text: new.text.clone(),
                    language: new.language.clone(),
                    confidence: new.confidence,
                    created_at: now,
                },
            );
        }

        let count = captions.len() as i32;
        if let Some(video) = state.videos.get_mut(&video_id.0) {
            video.caption_count = count;
            video.updated_at = now;
        }
        Ok(count)
    }

    async fn captions_for_video(&self, video_id: VideoId) -> StoreResult<Vec<Caption>> {
        let state = self.lock();
        let mut captions: Vec<Caption> = state
            .captions
            .values()
            .filter(|c| c.video_id == video_id)
            .cloned()
            .collect();
        captions.sort_by(|a, b| a.start_time.total_cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(captions)
    }

    async fn set_scene_embeddings(
        &self,
        id: SceneId,
        visual: &[f32],
        text: &[f32],
    ) -> StoreResult<()> {
        self.check_dim(visual)?;
        self.check_dim(text)?;
        let mut state = self.lock();
        let scene = state
            .scenes
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::scene_not_found(id))?;
        scene.visual_embedding = Some(visual.to_vec());
        scene.text_embedding = Some(text.to_vec());
        Ok(())
    }

    async fn nearest_scenes(
        &self,
        query: &[f32],
        kind: EmbeddingKind,
        k: usize,
        filter: &SceneFilter,
        _precision: Precision,
    ) -> StoreResult<Vec<ScoredScene>> {
        self.check_dim(query)?;
        let state = self.lock();
        let mut scored: Vec<ScoredScene> = state
            .scenes
            .values()
            .filter(|s| filter.matches(s.video_id))
            .filter_map(|s| {
                let sim = similarity(s, query, kind)?;
                let video = state.videos.get(&s.video_id.0)?;
                Some(ScoredScene {
                    scene: s.clone(),
                    video: video.clone(),
                    similarity: sim,
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.scene.id.cmp(&b.scene.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn text_candidates(
        &self,
        terms: &[String],
        filter: &SceneFilter,
        cap: usize,
    ) -> StoreResult<Vec<SceneWithVideo>> {
        let terms = lexical::normalize_terms(terms);
        if terms.is_empty() || cap == 0 {
            return Ok(Vec::new());
        }

        let state = self.lock();
        let mut scored: Vec<(u32, &Scene, &Video)> = state
            .scenes
            .values()
            .filter(|s| filter.matches(s.video_id))
            .filter_map(|s| {
                let video = state.videos.get(&s.video_id.0)?;
                let score = lexical::score(s, video, &terms);
                (score > 0).then_some((score, s, video))
            })
            .collect();
        scored.sort_by(|(sa, a, _), (sb, b, _)| sb.cmp(sa).then(a.id.cmp(&b.id)));
        Ok(scored
            .into_iter()
            .take(cap)
            .map(|(_, scene, video)| SceneWithVideo {
                scene: scene.clone(),
                video: video.clone(),
            })
            .collect())
    }

    async fn stats(&self) -> StoreResult<MediaStats> {
        let state = self.lock();
        let count_videos =
            |status: VideoStatus| state.videos.values().filter(|v| v.status == status).count() as i64;
        Ok(MediaStats {
            total_videos: state.videos.len() as i64,
            completed_videos: count_videos(VideoStatus::Completed),
            failed_videos: count_videos(VideoStatus::Failed),
            total_scenes: state.scenes.len() as i64,
            embedded_scenes: state.scenes.values().filter(|s| s.has_embeddings()).count() as i64,
            captioned_scenes: state.scenes.values().filter(|s| s.caption.is_some()).count() as i64,
            total_captions: state.captions.len() as i64,
            total_duration_secs: state
                .videos
                .values()
                .filter(|v| v.status == VideoStatus::Completed)
                .map(|v| v.duration)
                .sum(),
        })
    }

    async fn health(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    fn shots(n: i32) -> Vec<NewScene> {
        (0..n)
            .map(|i| NewScene {
                scene_index: i,
                start_time: i as f64 * 2.0,
                end_time: (i + 1) as f64 * 2.0,
                keyframe_path: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_video_is_pending() {
        let store = MemoryMediaStore::new(4);
        let video = store
            .create_video(NewVideo::new("a.mp4", "/v/a.mp4").with_tags(["x", "x", " y "]))
            .await
            .unwrap();
        assert_eq!(video.status, VideoStatus::Pending);
        assert_eq!(video.tags, vec!["x", "y"]);
        assert_eq!(store.get_video(video.id).await.unwrap(), video);
    }

    #[tokio::test]
    async fn test_duplicate_content_hash() {
        let store = MemoryMediaStore::new(4);
        let a = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        let b = store.create_video(NewVideo::new("b.mp4", "/v/b.mp4")).await.unwrap();
        store.set_content_hash(a.id, "h1").await.unwrap();
        // Re-running ingestion on the same video is fine.
        store.set_content_hash(a.id, "h1").await.unwrap();

        let err = store.set_content_hash(b.id, "h1").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateContent { existing_video_id } if existing_video_id == a.id
        ));
    }

    #[tokio::test]
    async fn test_upsert_scenes_is_idempotent() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        let first = store.upsert_scenes(video.id, &shots(3)).await.unwrap();
        store.set_scene_caption(first[0].id, "hello").await.unwrap();
        let second = store.upsert_scenes(video.id, &shots(3)).await.unwrap();

        assert_eq!(
            first.iter().map(|s| s.id).collect::<Vec<_>>(),
            second.iter().map(|s| s.id).collect::<Vec<_>>()
        );
        assert_eq!(second[0].caption.as_deref(), Some("hello"));
        assert_eq!(store.scenes_for_video(video.id).await.unwrap().len(), 3);
        assert_eq!(store.get_video(video.id).await.unwrap().scene_count, 3);

        store.upsert_scenes(video.id, &shots(2)).await.unwrap();
        assert_eq!(store.scenes_for_video(video.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_requires_all_embeddings() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        assert!(!store.complete_if_embedded(video.id).await.unwrap());

        let scenes = store.upsert_scenes(video.id, &shots(2)).await.unwrap();
        store
            .set_scene_embeddings(scenes[0].id, &unit(4, 0), &unit(4, 1))
            .await
            .unwrap();
        assert!(!store.complete_if_embedded(video.id).await.unwrap());

        store
            .set_scene_embeddings(scenes[1].id, &unit(4, 0), &unit(4, 1))
            .await
            .unwrap();
        assert!(store.complete_if_embedded(video.id).await.unwrap());
        assert_eq!(
            store.get_video(video.id).await.unwrap().status,
            VideoStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_embedding_dimension_checked() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        let scenes = store.upsert_scenes(video.id, &shots(1)).await.unwrap();
        let err = store
            .set_scene_embeddings(scenes[0].id, &[1.0; 3], &[1.0; 4])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 3 }));
    }

    #[tokio::test]
    async fn test_nearest_scenes_ranking_and_ties() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        let scenes = store.upsert_scenes(video.id, &shots(4)).await.unwrap();
        // Scene 3 has no embeddings and must be skipped.
        store.set_scene_embeddings(scenes[0].id, &unit(4, 0), &unit(4, 2)).await.unwrap();
        store.set_scene_embeddings(scenes[1].id, &unit(4, 0), &unit(4, 0)).await.unwrap();
        store.set_scene_embeddings(scenes[2].id, &unit(4, 0), &unit(4, 2)).await.unwrap();

        let hits = store
            .nearest_scenes(&unit(4, 2), EmbeddingKind::Text, 10, &SceneFilter::default(), Precision::Exact)
            .await
            .unwrap();
        let ids: Vec<SceneId> = hits.iter().map(|h| h.scene.id).collect();
        assert_eq!(ids, vec![scenes[0].id, scenes[2].id, scenes[1].id]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);

        let top = store
            .nearest_scenes(&unit(4, 2), EmbeddingKind::Text, 1, &SceneFilter::default(), Precision::Approximate)
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].scene.id, scenes[0].id);
    }

    #[tokio::test]
    async fn test_nearest_scenes_empty_corpus() {
        let store = MemoryMediaStore::new(4);
        let hits = store
            .nearest_scenes(&unit(4, 0), EmbeddingKind::Combined, 5, &SceneFilter::default(), Precision::Exact)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_only_own_scenes() {
        let store = MemoryMediaStore::new(4);
        let a = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        let b = store.create_video(NewVideo::new("b.mp4", "/v/b.mp4")).await.unwrap();
        store.upsert_scenes(a.id, &shots(2)).await.unwrap();
        store.upsert_scenes(b.id, &shots(3)).await.unwrap();

        store.delete_video(a.id).await.unwrap();
        assert!(store.get_video(a.id).await.unwrap_err().is_not_found());
        assert!(store.scenes_for_video(a.id).await.unwrap().is_empty());
        assert_eq!(store.scenes_for_video(b.id).await.unwrap().len(), 3);
        assert!(store.delete_video(a.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_text_candidates_match_caption_title_and_tags() {
        let store = MemoryMediaStore::new(4);
        let a = store
            .create_video(NewVideo::new("a.mp4", "/v/a.mp4").with_title("Highway Pursuit"))
            .await
            .unwrap();
        let b = store
            .create_video(NewVideo::new("b.mp4", "/v/b.mp4").with_tags(["cooking"]))
            .await
            .unwrap();
        let sa = store.upsert_scenes(a.id, &shots(1)).await.unwrap();
        let sb = store.upsert_scenes(b.id, &shots(2)).await.unwrap();
        store.set_scene_caption(sb[1].id, "A CAR drives away").await.unwrap();

        let hits = store
            .text_candidates(&["car".into()], &SceneFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scene.id, sb[1].id);

        let hits = store
            .text_candidates(&["pursuit".into(), "cooking".into()], &SceneFilter::default(), 10)
            .await
            .unwrap();
        let ids: Vec<SceneId> = hits.iter().map(|h| h.scene.id).collect();
        assert_eq!(ids, vec![sa[0].id, sb[0].id, sb[1].id]);

        let hits = store
            .text_candidates(&["cooking".into()], &SceneFilter::videos(vec![a.id]), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_text_candidates_cap_keeps_highest_scores() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        let scenes = store.upsert_scenes(video.id, &shots(4)).await.unwrap();
        let captions = ["a scar on the wall", "a scarf", "one car", "car car car chase"];
        for (scene, caption) in scenes.iter().zip(captions) {
            store.set_scene_caption(scene.id, caption).await.unwrap();
        }

        let hits = store
            .text_candidates(&["car".into()], &SceneFilter::default(), 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scene.id, scenes[3].id);

        let hits = store
            .text_candidates(&["CAR".into()], &SceneFilter::default(), 2)
            .await
            .unwrap();
        let ids: Vec<SceneId> = hits.iter().map(|h| h.scene.id).collect();
        assert_eq!(ids, vec![scenes[3].id, scenes[2].id]);
    }

    #[tokio::test]
    async fn test_replace_captions_is_idempotent() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        let scenes = store.upsert_scenes(video.id, &shots(2)).await.unwrap();
        let rows = vec![
            NewCaption::new(6.0, 7.0, "later").in_scene(scenes[1].id),
            NewCaption::new(1.0, 2.0, "first").in_scene(scenes[0].id),
        ];

        assert_eq!(store.replace_captions(video.id, &rows).await.unwrap(), 2);
        assert_eq!(store.replace_captions(video.id, &rows).await.unwrap(), 2);

        let stored = store.captions_for_video(video.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].text, "first");
        assert_eq!(stored[0].language, "en");
        assert_eq!(store.get_video(video.id).await.unwrap().caption_count, 2);
        assert_eq!(store.stats().await.unwrap().total_captions, 2);

        // Dropping a scene unlinks its cues but keeps them.
        store.upsert_scenes(video.id, &shots(1)).await.unwrap();
        let stored = store.captions_for_video(video.id).await.unwrap();
        assert_eq!(stored[1].scene_id, None);
        assert_eq!(stored[0].scene_id, Some(scenes[0].id));

        store.delete_video(video.id).await.unwrap();
        assert!(store.captions_for_video(video.id).await.unwrap().is_empty());
        assert!(store
            .replace_captions(video.id, &rows)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_patch_records_embedding_model() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        assert!(video.embedding_model.is_none());
        let video = store
            .update_video(video.id, VideoPatch::default().with_embedding_model("hashing-v1"))
            .await
            .unwrap();
        assert_eq!(video.embedding_model.as_deref(), Some("hashing-v1"));
        // Unset fields leave it alone.
        let video = store
            .update_video(video.id, VideoPatch::status(VideoStatus::Completed))
            .await
            .unwrap();
        assert_eq!(video.embedding_model.as_deref(), Some("hashing-v1"));
    }

    #[tokio::test]
    async fn test_list_videos_pagination() {
        let store = MemoryMediaStore::new(4);
        for i in 0..5 {
            store
                .create_video(NewVideo::new(format!("{}.mp4", i), format!("/v/{}.mp4", i)))
                .await
                .unwrap();
        }
        let page = store.list_videos(Page { limit: 2, offset: 1 }).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, VideoId(4));
        assert_eq!(store.list_videos(Page { limit: 500, offset: 0 }).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let store = MemoryMediaStore::new(4);
        let video = store.create_video(NewVideo::new("a.mp4", "/v/a.mp4")).await.unwrap();
        store
            .update_video(video.id, VideoPatch::status(VideoStatus::Processing).with_duration(12.0))
            .await
            .unwrap();
        let scenes = store.upsert_scenes(video.id, &shots(2)).await.unwrap();
        store.set_scene_caption(scenes[0].id, "x").await.unwrap();
        store.set_scene_embeddings(scenes[0].id, &unit(4, 0), &unit(4, 0)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_videos, 1);
        assert_eq!(stats.completed_videos, 0);
        assert_eq!(stats.total_scenes, 2);
        assert_eq!(stats.captioned_scenes, 1);
        assert_eq!(stats.embedded_scenes, 1);
    }
}
