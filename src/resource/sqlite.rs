//! SQLite tables as a resource stream

use super::record::Record;
use super::stream::{RecordIter, ResourceStream, SourceError};
use crate::graph::PropertyValue;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Rows fetched per table per round trip
const DEFAULT_PAGE_SIZE: usize = 5000;

/// Column layout of one table
#[derive(Debug, Clone)]
struct TableLayout {
    name: String,
    columns: Arc<[String]>,
    primary_keys: Vec<String>,
}

/// Reads every row of the selected tables of a SQLite database file.
///
/// Each row becomes a `Record` typed by its table name, identified by the
/// table's primary key columns. Every table must have a primary key, either
/// declared in the schema or passed via `with_primary_keys`.
#[derive(Debug, Clone)]
pub struct SqliteStream {
    path: PathBuf,
    tables: Vec<TableLayout>,
    mix_tables: bool,
    page_size: usize,
    total: usize,
}

impl SqliteStream {
    /// Open every table of the database.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        Self::builder(path).build()
    }

    pub fn builder(path: impl AsRef<Path>) -> SqliteStreamBuilder {
        SqliteStreamBuilder {
            path: path.as_ref().to_path_buf(),
            tables: None,
            primary_keys: HashMap::new(),
            mix_tables: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Names of the tables this stream reads, in read order
    pub fn tables(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    fn connect(path: &Path) -> Result<Connection, SourceError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }
}

/// Builder for [`SqliteStream`]
pub struct SqliteStreamBuilder {
    path: PathBuf,
    tables: Option<Vec<String>>,
    primary_keys: HashMap<String, Vec<String>>,
    mix_tables: bool,
    page_size: usize,
}

impl SqliteStreamBuilder {
    /// Restrict the stream to these tables
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Override the primary key columns of a table
    pub fn with_primary_keys<S: Into<String>>(mut self, table: impl Into<String>, keys: Vec<S>) -> Self {
        self.primary_keys
            .insert(table.into(), keys.into_iter().map(Into::into).collect());
        self
    }

    /// Interleave tables page by page (default) or read them one after the other
    pub fn with_mix_tables(mut self, mix: bool) -> Self {
        self.mix_tables = mix;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn build(self) -> Result<SqliteStream, SourceError> {
        let conn = SqliteStream::connect(&self.path)?;

        let all_tables: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let selected = match self.tables {
            Some(tables) => {
                for table in &tables {
                    if !all_tables.contains(table) {
                        return Err(SourceError::UnknownTable(table.clone()));
                    }
                }
                tables
            }
            None => all_tables,
        };
        info!("Reading sqlite tables {:?}", selected);

        let mut layouts = Vec::with_capacity(selected.len());
        let mut total = 0usize;
        for table in selected {
            let mut stmt = conn.prepare("SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid")?;
            let info: Vec<(String, i64)> = stmt
                .query_map(params![table], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?;

            let columns: Vec<String> = info.iter().map(|(name, _)| name.clone()).collect();
            let primary_keys = match self.primary_keys.get(&table) {
                Some(keys) => keys.clone(),
                None => {
                    let mut keyed: Vec<&(String, i64)> = info.iter().filter(|(_, pk)| *pk > 0).collect();
                    keyed.sort_by_key(|(_, pk)| *pk);
                    keyed.into_iter().map(|(name, _)| name.clone()).collect()
                }
            };
            if primary_keys.is_empty() {
                return Err(SourceError::MissingPrimaryKey { table });
            }

            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&table)),
                [],
                |row| row.get(0),
            )?;
            total += count.max(0) as usize;

            layouts.push(TableLayout {
                name: table,
                columns: columns.into(),
                primary_keys,
            });
        }

        Ok(SqliteStream {
            path: self.path,
            tables: layouts,
            mix_tables: self.mix_tables,
            page_size: self.page_size,
            total,
        })
    }
}

impl ResourceStream for SqliteStream {
    fn open(&self) -> Result<RecordIter, SourceError> {
        let conn = Self::connect(&self.path)?;
        let cursors = self
            .tables
            .iter()
            .cloned()
            .map(|layout| TableCursor {
                layout,
                last_rowid: i64::MIN,
                exhausted: false,
            })
            .collect();
        Ok(Box::new(SqlitePass {
            conn,
            cursors,
            mix_tables: self.mix_tables,
            page_size: self.page_size,
            current: 0,
            buffer: VecDeque::new(),
            failed: false,
        }))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.total)
    }
}

struct TableCursor {
    layout: TableLayout,
    last_rowid: i64,
    exhausted: bool,
}

/// One pass over the tables, paging by rowid.
struct SqlitePass {
    conn: Connection,
    cursors: Vec<TableCursor>,
    mix_tables: bool,
    page_size: usize,
    current: usize,
    buffer: VecDeque<Record>,
    failed: bool,
}

impl SqlitePass {
    /// Index of the next table to page from, or `None` when all are drained
    fn next_table(&self) -> Option<usize> {
        let n = self.cursors.len();
        if self.mix_tables {
            (0..n)
                .map(|offset| (self.current + offset) % n)
                .find(|&i| !self.cursors[i].exhausted)
        } else {
            self.cursors.iter().position(|c| !c.exhausted)
        }
    }

    fn fetch_page(&mut self, index: usize) -> Result<usize, SourceError> {
        let cursor = &mut self.cursors[index];
        let layout = &cursor.layout;
        let sql = format!(
            "SELECT rowid, * FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            quote_ident(&layout.name)
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![cursor.last_rowid, self.page_size as i64])?;

        let mut fetched = 0usize;
        while let Some(row) = rows.next()? {
            cursor.last_rowid = row.get(0)?;
            let mut record = Record::new(layout.name.clone())
                .with_identifying(layout.primary_keys.iter().cloned());
            for (i, column) in layout.columns.iter().enumerate() {
                record.set(column.clone(), to_property(row.get_ref(i + 1)?));
            }
            self.buffer.push_back(record);
            fetched += 1;
        }
        debug!("fetched {} rows from {}", fetched, layout.name);

        if fetched < self.page_size {
            cursor.exhausted = true;
        }
        Ok(fetched)
    }
}

impl Iterator for SqlitePass {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.failed {
                return None;
            }
            let index = self.next_table()?;
            if let Err(e) = self.fetch_page(index) {
                self.failed = true;
                return Some(Err(e));
            }
            if self.mix_tables {
                self.current = (index + 1) % self.cursors.len();
            }
        }
    }
}

fn to_property(value: ValueRef<'_>) -> PropertyValue {
    match value {
        ValueRef::Null => PropertyValue::Null,
        ValueRef::Integer(i) => PropertyValue::Int(i),
        ValueRef::Real(f) => PropertyValue::Float(f),
        ValueRef::Text(t) => PropertyValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => PropertyValue::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
