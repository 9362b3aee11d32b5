//! PostgreSQL + pgvector implementation of [`MediaStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, info};
use vidx_models::{
    Caption, EmbeddingKind, MediaStats, NewCaption, NewScene, NewVideo, Scene, SceneId, Video,
    VideoId, VideoStatus,
};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::lexical;
use crate::store::{
    MediaStore, Page, Precision, SceneFilter, SceneWithVideo, ScoredScene, VideoPatch,
};

#[derive(sqlx::FromRow)]
struct VideoRow {
    id: i64,
    filename: String,
    filepath: String,
    content_hash: Option<String>,
    title: Option<String>,
    tags: Json<Vec<String>>,
    metadata: Json<serde_json::Map<String, serde_json::Value>>,
    status: String,
    scene_count: i32,
    caption_count: i32,
    embedding_model: Option<String>,
    duration: f64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<VideoRow> for Video {
    type Error = StoreError;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<VideoStatus>()
            .map_err(StoreError::corrupt)?;
        Ok(Video {
            id: VideoId(row.id),
            filename: row.filename,
            filepath: row.filepath,
            content_hash: row.content_hash,
            title: row.title,
            tags: row.tags.0,
            metadata: row.metadata.0,
            status,
            scene_count: row.scene_count,
            caption_count: row.caption_count,
            embedding_model: row.embedding_model,
            duration: row.duration,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_processed_at: row.last_processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SceneRow {
    id: i64,
    video_id: i64,
    scene_index: i32,
    start_time: f64,
    end_time: f64,
    keyframe_path: Option<String>,
    caption: Option<String>,
    visual_embedding: Option<Vector>,
    text_embedding: Option<Vector>,
    created_at: DateTime<Utc>,
}

impl From<SceneRow> for Scene {
    fn from(row: SceneRow) -> Self {
        Scene {
            id: SceneId(row.id),
            video_id: VideoId(row.video_id),
            scene_index: row.scene_index,
            start_time: row.start_time,
            end_time: row.end_time,
            keyframe_path: row.keyframe_path,
            caption: row.caption,
            visual_embedding: row.visual_embedding.map(|v| v.to_vec()),
            text_embedding: row.text_embedding.map(|v| v.to_vec()),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CaptionRow {
    id: i64,
    video_id: i64,
    scene_id: Option<i64>,
    start_time: f64,
    end_time: f64,
    text: String,
    language: String,
    confidence: f32,
    created_at: DateTime<Utc>,
}

impl From<CaptionRow> for Caption {
    fn from(row: CaptionRow) -> Self {
        Caption {
            id: row.id,
            video_id: VideoId(row.video_id),
            scene_id: row.scene_id.map(SceneId),
            start_time: row.start_time,
            end_time: row.end_time,
            text: row.text,
            language: row.language,
            confidence: row.confidence,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_videos: i64,
    completed_videos: i64,
    failed_videos: i64,
    total_scenes: i64,
    embedded_scenes: i64,
    captioned_scenes: i64,
    total_captions: i64,
    total_duration_secs: f64,
}

/// Escape LIKE metacharacters and wrap the term for a substring match.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// HNSW filters after walking the graph, so a search restricted to some
/// videos can come back with fewer than `k` rows. Those scans are exact.
fn effective_precision(precision: Precision, filter: &SceneFilter) -> Precision {
    match (precision, &filter.video_ids) {
        (Precision::Approximate, Some(_)) => Precision::Exact,
        _ => precision,
    }
}

/// Number of whole tokens of `column` found in the `$1` term array.
fn token_count_sql(column: &str) -> String {
    format!(
        "(SELECT count(*) FROM regexp_split_to_table(lower(COALESCE({}, '')), '[^[:alnum:]]+') tok \
         WHERE tok = ANY($1))",
        column
    )
}

/// Cosine distance expression and the rows it applies to, per embedding kind.
fn distance_sql(kind: EmbeddingKind) -> (&'static str, &'static str) {
    match kind {
        EmbeddingKind::Text => ("s.text_embedding <=> $1", "s.text_embedding IS NOT NULL"),
        EmbeddingKind::Visual => ("s.visual_embedding <=> $1", "s.visual_embedding IS NOT NULL"),
        EmbeddingKind::Combined => (
            "((s.text_embedding <=> $1) + (s.visual_embedding <=> $1)) / 2",
            "s.text_embedding IS NOT NULL AND s.visual_embedding IS NOT NULL",
        ),
    }
}

/// Media store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgMediaStore {
    pool: PgPool,
    embedding_dim: usize,
}

impl PgMediaStore {
    /// Connect, verify the connection and apply migrations if configured.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;

        if config.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations applied");
        }

        info!(
            max_connections = config.max_connections,
            embedding_dim = config.embedding_dim,
            "Media store connected"
        );
        Ok(Self::from_pool(pool, config.embedding_dim))
    }

    pub fn from_pool(pool: PgPool, embedding_dim: usize) -> Self {
        Self {
            pool,
            embedding_dim,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
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

    /// Load scenes and their videos for `ids`, preserving the order of `ids`.
    async fn load_with_videos(&self, ids: &[i64]) -> StoreResult<Vec<SceneWithVideo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let scene_rows = sqlx::query_as::<_, SceneRow>("SELECT * FROM scenes WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        let mut scenes: HashMap<i64, Scene> = scene_rows
            .into_iter()
            .map(|row| (row.id, Scene::from(row)))
            .collect();

        let mut video_ids: Vec<i64> = scenes.values().map(|s| s.video_id.0).collect();
        video_ids.sort_unstable();
        video_ids.dedup();

        let video_rows = sqlx::query_as::<_, VideoRow>("SELECT * FROM videos WHERE id = ANY($1)")
            .bind(&video_ids)
            .fetch_all(&self.pool)
            .await?;
        let mut videos: HashMap<i64, Video> = HashMap::with_capacity(video_rows.len());
        for row in video_rows {
            videos.insert(row.id, Video::try_from(row)?);
        }

        Ok(ids
            .iter()
            .filter_map(|id| {
                let scene = scenes.remove(id)?;
                let video = videos.get(&scene.video_id.0)?.clone();
                Some(SceneWithVideo { scene, video })
            })
            .collect())
    }
}

#[async_trait]
impl MediaStore for PgMediaStore {
    async fn create_video(&self, video: NewVideo) -> StoreResult<Video> {
        let tags = vidx_models::normalize_tags(video.tags);
        let row = sqlx::query_as::<_, VideoRow>(
            r#"
            INSERT INTO videos (filename, filepath, title, tags, metadata, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(&video.filename)
        .bind(&video.filepath)
        .bind(&video.title)
        .bind(Json(&tags))
        .bind(Json(&video.metadata))
        .fetch_one(&self.pool)
        .await?;

        let video = Video::try_from(row)?;
        info!(video_id = %video.id, filename = %video.filename, "Created video");
        Ok(video)
    }

    async fn get_video(&self, id: VideoId) -> StoreResult<Video> {
        sqlx::query_as::<_, VideoRow>("SELECT * FROM videos WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::video_not_found(id))?
            .try_into()
    }

    async fn list_videos(&self, page: Page) -> StoreResult<Vec<Video>> {
        let page = Page::clamped(Some(page.limit), Some(page.offset));
        let rows = sqlx::query_as::<_, VideoRow>(
            "SELECT * FROM videos ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Video::try_from).collect()
    }

    async fn count_videos(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn update_video(&self, id: VideoId, patch: VideoPatch) -> StoreResult<Video> {
        let (set_error, error) = match patch.error_message {
            Some(e) => (true, e),
            None => (false, None),
        };
        sqlx::query_as::<_, VideoRow>(
            r#"
            UPDATE videos SET
                status = COALESCE($2, status),
                title = COALESCE($3, title),
                duration = COALESCE($4, duration),
                error_message = CASE WHEN $5 THEN $6 ELSE error_message END,
                metadata = metadata || COALESCE($7, '{}'::jsonb),
                last_processed_at = CASE WHEN $8 THEN now() ELSE last_processed_at END,
                embedding_model = COALESCE($9, embedding_model),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.title)
        .bind(patch.duration)
        .bind(set_error)
        .bind(error)
        .bind(patch.metadata.map(Json))
        .bind(patch.touch_processed)
        .bind(&patch.embedding_model)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::video_not_found(id))?
        .try_into()
    }

    async fn set_content_hash(&self, id: VideoId, hash: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE videos SET content_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id.0)
        .bind(hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::video_not_found(id)),
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let (existing,): (i64,) =
                    sqlx::query_as("SELECT id FROM videos WHERE content_hash = $1")
                        .bind(hash)
                        .fetch_one(&self.pool)
                        .await?;
                Err(StoreError::DuplicateContent {
                    existing_video_id: VideoId(existing),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete_if_embedded(&self, id: VideoId) -> StoreResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE videos SET status = 'completed', error_message = NULL,
                last_processed_at = now(), updated_at = now()
            WHERE id = $1
              AND status <> 'completed'
              AND EXISTS (SELECT 1 FROM scenes WHERE video_id = $1)
              AND NOT EXISTS (
                  SELECT 1 FROM scenes
                  WHERE video_id = $1
                    AND (visual_embedding IS NULL OR text_embedding IS NULL)
              )
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_video(&self, id: VideoId) -> StoreResult<()> {
        let done = sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::video_not_found(id));
        }
        info!(video_id = %id, "Deleted video");
        Ok(())
    }

    async fn upsert_scenes(&self, video_id: VideoId, scenes: &[NewScene]) -> StoreResult<Vec<Scene>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM videos WHERE id = $1 FOR UPDATE")
            .bind(video_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::video_not_found(video_id));
        }

        let mut stored = Vec::with_capacity(scenes.len());
        for scene in scenes {
            let row = sqlx::query_as::<_, SceneRow>(
                r#"
                INSERT INTO scenes (video_id, scene_index, start_time, end_time, keyframe_path)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (video_id, scene_index) DO UPDATE SET
                    start_time = EXCLUDED.start_time,
                    end_time = EXCLUDED.end_time,
                    keyframe_path = COALESCE(EXCLUDED.keyframe_path, scenes.keyframe_path)
                RETURNING *
                "#,
            )
            .bind(video_id.0)
            .bind(scene.scene_index)
            .bind(scene.start_time)
            .bind(scene.end_time)
            .bind(&scene.keyframe_path)
            .fetch_one(&mut *tx)
            .await?;
            stored.push(Scene::from(row));
        }

        sqlx::query("DELETE FROM scenes WHERE video_id = $1 AND scene_index >= $2")
            .bind(video_id.0)
            .bind(scenes.len() as i32)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE videos SET scene_count = $2, updated_at = now() WHERE id = $1")
            .bind(video_id.0)
            .bind(scenes.len() as i32)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(video_id = %video_id, count = stored.len(), "Upserted scenes");
        Ok(stored)
    }

    async fn scenes_for_video(&self, video_id: VideoId) -> StoreResult<Vec<Scene>> {
        let rows = sqlx::query_as::<_, SceneRow>(
            "SELECT * FROM scenes WHERE video_id = $1 ORDER BY scene_index",
        )
        .bind(video_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Scene::from).collect())
    }

    async fn set_scene_keyframe(&self, id: SceneId, path: &str) -> StoreResult<()> {
        let done = sqlx::query("UPDATE scenes SET keyframe_path = $2 WHERE id = $1")
            .bind(id.0)
            .bind(path)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::scene_not_found(id));
        }
        Ok(())
    }

    async fn set_scene_caption(&self, id: SceneId, caption: &str) -> StoreResult<()> {
        let done = sqlx::query("UPDATE scenes SET caption = $2 WHERE id = $1")
            .bind(id.0)
            .bind(caption)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::scene_not_found(id));
        }
        Ok(())
    }

    async fn replace_captions(&self, video_id: VideoId, captions: &[NewCaption]) -> StoreResult<i32> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM videos WHERE id = $1 FOR UPDATE")
            .bind(video_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::video_not_found(video_id));
        }

        sqlx::query("DELETE FROM captions WHERE video_id = $1")
            .bind(video_id.0)
            .execute(&mut *tx)
            .await?;

        for caption in captions {
            sqlx::query(
                r#"
                INSERT INTO captions
                    (video_id, scene_id, start_time, end_time, text, language, confidence)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(video_id.0)
            .bind(caption.scene_id.map(|id| id.0))
            .bind(caption.start_time)
            .bind(caption.end_time)
            .bind(&caption.text)
            .bind(&caption.language)
            .bind(caption.confidence)
            .execute(&mut *tx)
            .await?;
        }

        let count = captions.len() as i32;
        sqlx::query("UPDATE videos SET caption_count = $2, updated_at = now() WHERE id = $1")
            .bind(video_id.0)
            .bind(count)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(video_id = %video_id, count, "Replaced captions");
        Ok(count)
    }

    async fn captions_for_video(&self, video_id: VideoId) -> StoreResult<Vec<Caption>> {
        let rows = sqlx::query_as::<_, CaptionRow>(
            "SELECT * FROM captions WHERE video_id = $1 ORDER BY start_time, id",
        )
        .bind(video_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Caption::from).collect())
    }

    async fn set_scene_embeddings(
        &self,
        id: SceneId,
        visual: &[f32],
        text: &[f32],
    ) -> StoreResult<()> {
        self.check_dim(visual)?;
        self.check_dim(text)?;
        let done = sqlx::query(
            "UPDATE scenes SET visual_embedding = $2, text_embedding = $3 WHERE id = $1",
        )
        .bind(id.0)
        .bind(Vector::from(visual.to_vec()))
        .bind(Vector::from(text.to_vec()))
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::scene_not_found(id));
        }
        Ok(())
    }

    async fn nearest_scenes(
        &self,
        query: &[f32],
        kind: EmbeddingKind,
        k: usize,
        filter: &SceneFilter,
        precision: Precision,
    ) -> StoreResult<Vec<ScoredScene>> {
        self.check_dim(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let requested = precision;
        let precision = effective_precision(precision, filter);
        if precision != requested {
            debug!("Video filter present, using an exact scan");
        }

        let (distance, present) = distance_sql(kind);
        // The HNSW index only serves a bare distance ordering; exact scans
        // also order by id so ties resolve in the database.
        let order = match precision {
            Precision::Exact => format!("{}, s.id", distance),
            Precision::Approximate => distance.to_string(),
        };
        let sql = format!(
            r#"
            SELECT s.id, (1 - ({distance}))::float8 AS similarity
            FROM scenes s
            WHERE {present}
              AND ($2::bigint[] IS NULL OR s.video_id = ANY($2))
            ORDER BY {order}
            LIMIT $3
            "#,
        );

        let mut tx = self.pool.begin().await?;
        match precision {
            Precision::Exact => {
                sqlx::query("SET LOCAL enable_indexscan = off")
                    .execute(&mut *tx)
                    .await?;
            }
            Precision::Approximate => {
                let ef_search = (k * 2).max(40);
                sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", ef_search))
                    .execute(&mut *tx)
                    .await?;
            }
        }
        let hits: Vec<(i64, f64)> = sqlx::query_as(&sql)
            .bind(Vector::from(query.to_vec()))
            .bind(filter.as_i64s())
            .bind(k as i64)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let ids: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
        let scores: HashMap<i64, f64> = hits.into_iter().collect();
        let mut scored: Vec<ScoredScene> = self
            .load_with_videos(&ids)
            .await?
            .into_iter()
            .map(|sv| {
                let similarity = scores.get(&sv.scene.id.0).copied().unwrap_or(0.0) as f32;
                ScoredScene {
                    scene: sv.scene,
                    video: sv.video,
                    similarity,
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.scene.id.cmp(&b.scene.id))
        });
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
        let patterns: Vec<String> = terms.iter().map(|t| like_pattern(t)).collect();

        // Scored in SQL so the cap keeps the best rows, not the oldest.
        let ids: Vec<(i64,)> = sqlx::query_as(&format!(
            r#"
            SELECT id FROM (
                SELECT s.id,
                    {caption} + $4 * ({title} + {tags}) AS score
                FROM scenes s
                JOIN videos v ON v.id = s.video_id
                WHERE ($2::bigint[] IS NULL OR s.video_id = ANY($2))
                  AND (
                      s.caption ILIKE ANY($5)
                      OR v.title ILIKE ANY($5)
                      OR v.tags::text ILIKE ANY($5)
                  )
            ) scored
            WHERE score > 0
            ORDER BY score DESC, id ASC
            LIMIT $3
            "#,
            caption = token_count_sql("s.caption"),
            title = token_count_sql("v.title"),
            tags = "(SELECT count(*) FROM jsonb_array_elements_text(v.tags) tag, \
                    regexp_split_to_table(lower(tag), '[^[:alnum:]]+') tok WHERE tok = ANY($1))",
        ))
        .bind(&terms)
        .bind(filter.as_i64s())
        .bind(cap as i64)
        .bind(lexical::METADATA_WEIGHT as i64)
        .bind(&patterns)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = ids.into_iter().map(|(id,)| id).collect();
        self.load_with_videos(&ids).await
    }

    async fn stats(&self) -> StoreResult<MediaStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                (SELECT count(*) FROM videos) AS total_videos,
                (SELECT count(*) FROM videos WHERE status = 'completed') AS completed_videos,
                (SELECT count(*) FROM videos WHERE status = 'failed') AS failed_videos,
                (SELECT count(*) FROM scenes) AS total_scenes,
                (SELECT count(*) FROM scenes
                    WHERE visual_embedding IS NOT NULL AND text_embedding IS NOT NULL) AS embedded_scenes,
                (SELECT count(*) FROM scenes WHERE caption IS NOT NULL) AS captioned_scenes,
                (SELECT count(*) FROM captions) AS total_captions,
                (SELECT COALESCE(sum(duration), 0)::float8 FROM videos
                    WHERE status = 'completed') AS total_duration_secs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(MediaStats {
            total_videos: row.total_videos,
            completed_videos: row.completed_videos,
            failed_videos: row.failed_videos,
            total_scenes: row.total_scenes,
            embedded_scenes: row.embedded_scenes,
            captioned_scenes: row.captioned_scenes,
            total_captions: row.total_captions,
            total_duration_secs: row.total_duration_secs,
        })
    }

    async fn health(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
