use core::num::NonZeroU32;
use std::{path::Path, sync::Arc, time::SystemTime};

use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use tokio::task::spawn_blocking;

use crate::{
    record::{Candidate, Inserted, Place, PlaceCandidate, Record},
    util::{from_unix_millis, unix_millis},
};

#[derive(Debug, thiserror::Error)]
pub enum DBError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type DBResult<T> = Result<T, DBError>;

pub mod constants {
    use core::time::Duration;

    macro_rules! env_or_default {
        ($name:expr, $default:expr) => {
            if let Some(s) = option_env!($name) {
                s
            } else {
                $default
            }
        };
    }

    pub const PATH: &str = env_or_default!("SSCR_DB", "scraped.db");
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id   TEXT NOT NULL UNIQUE,
        title         TEXT NOT NULL,
        score         INTEGER NOT NULL DEFAULT 0,
        comment_count INTEGER NOT NULL DEFAULT 0,
        link          TEXT,
        scraped_at    INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_records_scraped_at ON records(scraped_at);

    CREATE TABLE IF NOT EXISTS places (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        search_term TEXT NOT NULL,
        name        TEXT,
        address     TEXT,
        latitude    REAL,
        longitude   REAL,
        country     TEXT,
        category    TEXT,
        phone       TEXT,
        scraped_at  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_places_scraped_at ON places(scraped_at);
";

/// Handle to the embedded store. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Gateway {
    conn: Arc<Mutex<Connection>>,
}

impl Gateway {
    /// Open (creating if absent) the store at `path` and make sure the schema
    /// exists before anything else touches it.
    pub fn open(path: impl AsRef<Path>) -> DBResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let gateway = Self::init(conn)?;
        tracing::info!(target: "db", "store ready at {}", path.display());
        Ok(gateway)
    }

    pub fn in_memory() -> DBResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DBResult<Self> {
        conn.busy_timeout(constants::BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> DBResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        Ok(spawn_blocking(move || f(&conn.lock())).await??)
    }

    /// Insert `candidate` unless its external id is already stored.
    pub async fn insert(&self, candidate: &Candidate) -> DBResult<Inserted> {
        const SQL: &str = "insert or ignore into records (external_id, title, score, comment_count, link, scraped_at) values (?1, ?2, ?3, ?4, ?5, ?6)";

        let c = candidate.clone();
        let n_rows = self
            .with_conn(move |conn| {
                conn.prepare_cached(SQL)?.execute(params![
                    c.external_id.as_str(),
                    c.title,
                    to_sql_int(c.score),
                    to_sql_int(c.comment_count),
                    c.link,
                    unix_millis(SystemTime::now()),
                ])
            })
            .await?;

        Ok(if n_rows == 0 {
            Inserted::Duplicate
        } else {
            Inserted::Fresh
        })
    }

    /// Newest records first, at most `limit` of them.
    pub async fn fetch_latest(&self, limit: NonZeroU32) -> DBResult<Vec<Record>> {
        self.fetch_page(limit, 0).await
    }

    pub async fn fetch_page(&self, limit: NonZeroU32, offset: u64) -> DBResult<Vec<Record>> {
        const SQL: &str = "select id, external_id, title, score, comment_count, link, scraped_at from records order by scraped_at desc, id desc limit ?1 offset ?2";

        self.with_conn(move |conn| {
            conn.prepare_cached(SQL)?
                .query_map(params![limit.get(), to_sql_int(offset)], record_from_row)?
                .collect()
        })
        .await
    }

    pub async fn count(&self) -> DBResult<u64> {
        self.with_conn(|conn| conn.query_row("select count(*) from records", [], |r| r.get::<_, i64>(0)))
            .await
            .map(from_sql_int)
    }

    pub async fn insert_place(&self, place: &PlaceCandidate) -> DBResult<i64> {
        const SQL: &str = "insert into places (search_term, name, address, latitude, longitude, country, category, phone, scraped_at) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

        let p = place.clone();
        self.with_conn(move |conn| {
            conn.prepare_cached(SQL)?.execute(params![
                p.search_term,
                p.name,
                p.address,
                p.latitude,
                p.longitude,
                p.country,
                p.category,
                p.phone,
                unix_millis(SystemTime::now()),
            ])?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn fetch_places_page(&self, limit: NonZeroU32, offset: u64) -> DBResult<Vec<Place>> {
        const SQL: &str = "select id, search_term, name, address, latitude, longitude, country, category, phone, scraped_at from places order by scraped_at desc, id desc limit ?1 offset ?2";

        self.with_conn(move |conn| {
            conn.prepare_cached(SQL)?
                .query_map(params![limit.get(), to_sql_int(offset)], place_from_row)?
                .collect()
        })
        .await
    }

    pub async fn count_places(&self) -> DBResult<u64> {
        self.with_conn(|conn| conn.query_row("select count(*) from places", [], |r| r.get::<_, i64>(0)))
            .await
            .map(from_sql_int)
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn record_from_row(row: &Row) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        external_id: row.get::<_, String>(1)?.into(),
        title: row.get(2)?,
        score: from_sql_int(row.get(3)?),
        comment_count: from_sql_int(row.get(4)?),
        link: row.get(5)?,
        scraped_at: from_unix_millis(row.get(6)?),
    })
}

fn place_from_row(row: &Row) -> rusqlite::Result<Place> {
    Ok(Place {
        id: row.get(0)?,
        search_term: row.get(1)?,
        name: row.get(2)?,
        address: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        country: row.get(6)?,
        category: row.get(7)?,
        phone: row.get(8)?,
        scraped_at: from_unix_millis(row.get(9)?),
    })
}
