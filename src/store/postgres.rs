use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Token Operations --

    pub async fn insert_token(&self, token: &NewToken) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO tokens (public_id, secret, name, created_at, expires_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(token.public_id)
        .bind(&token.secret)
        .bind(&token.name)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_token_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<TokenRow>, sqlx::Error> {
        sqlx::query_as::<_, TokenRow>(
            "SELECT id, public_id, secret, name, created_at, expires_at FROM tokens WHERE secret = $1",
        )
        .bind(secret)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_tokens(&self) -> Result<Vec<TokenRow>, sqlx::Error> {
        sqlx::query_as::<_, TokenRow>(
            "SELECT id, public_id, secret, name, created_at, expires_at FROM tokens ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Delete a token by public id. Images owned by the token go with it
    /// (ON DELETE CASCADE). Returns false when nothing matched.
    pub async fn delete_token(&self, public_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tokens WHERE public_id = $1")
            .bind(public_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // -- Image Operations --

    pub async fn insert_image(&self, image: &NewImage) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO images (public_id, data, size, created_at, token_id)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(image.public_id)
        .bind(&image.data)
        .bind(image.size)
        .bind(image.created_at)
        .bind(image.token_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_image(&self, public_id: Uuid) -> Result<Option<ImageRow>, sqlx::Error> {
        sqlx::query_as::<_, ImageRow>(
            "SELECT id, public_id, data, size, created_at, token_id FROM images WHERE public_id = $1",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List image metadata newest-first, optionally scoped to one owner.
    /// Raw image data stays in the database; listings never carry it.
    pub async fn list_images(
        &self,
        owner: Option<i64>,
    ) -> Result<Vec<ImageMetaRow>, sqlx::Error> {
        match owner {
            Some(token_id) => {
                sqlx::query_as::<_, ImageMetaRow>(
                    r#"SELECT i.public_id, i.size, i.created_at, t.public_id AS owner_id
                       FROM images i JOIN tokens t ON t.id = i.token_id
                       WHERE i.token_id = $1
                       ORDER BY i.created_at DESC, i.id DESC"#,
                )
                .bind(token_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ImageMetaRow>(
                    r#"SELECT i.public_id, i.size, i.created_at, t.public_id AS owner_id
                       FROM images i JOIN tokens t ON t.id = i.token_id
                       ORDER BY i.created_at DESC, i.id DESC"#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
    }

    /// Delete an image by public id. With an owner filter only that owner's
    /// image can match; without one any image matches (administrator path).
    pub async fn delete_image(
        &self,
        public_id: Uuid,
        owner: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        let result = match owner {
            Some(token_id) => {
                sqlx::query("DELETE FROM images WHERE public_id = $1 AND token_id = $2")
                    .bind(public_id)
                    .bind(token_id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM images WHERE public_id = $1")
                    .bind(public_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    /// Trim an owner to its `quota` most recent images and return the number
    /// of rows deleted. Ordering is creation time, newest first, with the
    /// internal sequence id as tie-break so equal timestamps evict
    /// deterministically. The caller runs this right after an insert, so the
    /// just-uploaded image is part of the ordering.
    pub async fn purge_images(&self, token_id: i64, quota: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"DELETE FROM images
               WHERE token_id = $1
                 AND id NOT IN (
                     SELECT id FROM images
                     WHERE token_id = $1
                     ORDER BY created_at DESC, id DESC
                     LIMIT $2
                 )"#,
        )
        .bind(token_id)
        .bind(quota)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// -- Input structs --

pub struct NewToken {
    pub public_id: Uuid,
    pub secret: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct NewImage {
    pub public_id: Uuid,
    /// Base64-encoded image bytes as stored.
    pub data: String,
    /// Decoded byte length, not the base64 text length.
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub token_id: i64,
}

// -- Output structs --

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TokenRow {
    /// Internal sequence id; never exposed to clients.
    pub id: i64,
    pub public_id: Uuid,
    pub secret: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ImageRow {
    pub id: i64,
    pub public_id: Uuid,
    pub data: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub token_id: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ImageMetaRow {
    pub public_id: Uuid,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    /// Public id of the owning token.
    pub owner_id: Uuid,
}
