//! The admin operation that creates a new database on disk.
//!
//! A `new database` request carries a map of configuration values; after
//! validation the database directory is created with its two files, a
//! commented configuration skeleton and the encoded metadata record. Any
//! failure past directory creation rolls everything back.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::{error, info};

use strata_codec::{Decoder, Encoder, Token};
use strata_data::{ConfigError, DatabaseConfig, TimePrecision};

/// Configuration skeleton written into every new database directory.
pub const DB_CONF_FN: &str = "database.conf";
/// Encoded metadata record of a database.
pub const DB_DAT_FN: &str = "database.dat";

const SCHEMA_VERSION: i64 = 1;

const DEFAULT_CONF: &str = "\
#
# Welcome to the StrataDB configuration file
#

[buffer]
# Alternative path to save the buffer file.
# In case you later plan to change this location you manually need to move
# the buffer file to the new location.
# path = <buffer_path>
";

/// A rejected `new database` request.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid request")]
    InvalidRequest,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database directory already exists: {0}")]
    AlreadyExists(String),

    #[error("cannot create directory: {0}")]
    CreateDirectory(String),

    #[error("cannot write file: {0}")]
    WriteFile(String),
}

/// Handle a `new database` request body against `root`, the directory all
/// databases live under.
///
/// On success the directory `<root>/<dbname>/` exists with both files
/// written, and the validated configuration is returned for the caller to
/// build the database instance from. On failure nothing is left behind.
pub fn new_database(root: &Path, body: &[u8]) -> Result<DatabaseConfig, AdminError> {
    let request = NewDatabaseRequest::decode(body)?;
    let precision = match &request.time_precision {
        None => None,
        Some(s) => Some(TimePrecision::from_str(s)?),
    };
    let config = DatabaseConfig::new(
        &request.dbname,
        precision,
        request.buffer_size,
        request.duration_num.as_deref(),
        request.duration_log.as_deref(),
    )?;

    let dbpath = root.join(&config.dbname);
    if let Err(err) = fs::create_dir(&dbpath) {
        return Err(if err.kind() == std::io::ErrorKind::AlreadyExists {
            AdminError::AlreadyExists(dbpath.display().to_string())
        } else {
            AdminError::CreateDirectory(dbpath.display().to_string())
        });
    }

    let conf_path = dbpath.join(DB_CONF_FN);
    if fs::write(&conf_path, DEFAULT_CONF).is_err() {
        rollback_new_database(&dbpath);
        return Err(AdminError::WriteFile(conf_path.display().to_string()));
    }

    let dat_path = dbpath.join(DB_DAT_FN);
    if fs::write(&dat_path, encode_metadata(&config).as_slice()).is_err() {
        rollback_new_database(&dbpath);
        return Err(AdminError::WriteFile(dat_path.display().to_string()));
    }

    info!(dbname = %config.dbname, path = %dbpath.display(), "created database");
    Ok(config)
}

/// Undo a partially created database directory.
///
/// Best effort by design: files that were never written and a directory that
/// was never created only produce an error log, never a failure, so the
/// rollback may run on any path at any stage.
pub fn rollback_new_database(dbpath: &Path) {
    let _ = fs::remove_file(dbpath.join(DB_CONF_FN));
    let _ = fs::remove_file(dbpath.join(DB_DAT_FN));
    if fs::remove_dir(dbpath).is_err() {
        error!("Roll-back creating new database has failed.");
    }
}

fn encode_metadata(config: &DatabaseConfig) -> Encoder {
    let precision_index = match config.time_precision {
        TimePrecision::Second => 0i64,
        TimePrecision::Milli => 1,
        TimePrecision::Micro => 2,
        TimePrecision::Nano => 3,
    };
    let mut enc = Encoder::new();
    enc.add_array_open();
    enc.add_int64(SCHEMA_VERSION);
    enc.add_raw(config.dbname.as_bytes());
    enc.add_int64(precision_index);
    enc.add_int64(config.buffer_size as i64);
    enc.add_int64(config.duration_num as i64);
    enc.add_int64(config.duration_log as i64);
    enc.add_array_close();
    enc
}

#[derive(Debug, Default)]
struct NewDatabaseRequest {
    dbname: String,
    time_precision: Option<String>,
    buffer_size: Option<i64>,
    duration_num: Option<String>,
    duration_log: Option<String>,
}

impl NewDatabaseRequest {
    fn decode(body: &[u8]) -> Result<Self, AdminError> {
        let mut dec = Decoder::new(body);
        if !matches!(dec.next(), Ok(Token::MapOpen)) {
            return Err(AdminError::InvalidRequest);
        }

        let mut dbname = None;
        let mut request = NewDatabaseRequest::default();
        loop {
            let key = match dec.next() {
                Ok(Token::Raw(key)) => key,
                Ok(Token::MapClose) | Ok(Token::End) => break,
                _ => return Err(AdminError::InvalidRequest),
            };
            match key {
                b"dbname" => match dec.next() {
                    Ok(Token::Raw(v)) => dbname = Some(lossy(v)),
                    _ => return Err(AdminError::InvalidRequest),
                },
                b"time_precision" => match dec.next() {
                    Ok(Token::Raw(v)) => request.time_precision = Some(lossy(v)),
                    _ => return Err(AdminError::InvalidRequest),
                },
                b"buffer_size" => match dec.next() {
                    Ok(Token::Int64(n)) => request.buffer_size = Some(n),
                    _ => return Err(AdminError::InvalidRequest),
                },
                b"duration_num" => match dec.next() {
                    Ok(Token::Raw(v)) => request.duration_num = Some(lossy(v)),
                    _ => return Err(AdminError::InvalidRequest),
                },
                b"duration_log" => match dec.next() {
                    Ok(Token::Raw(v)) => request.duration_log = Some(lossy(v)),
                    _ => return Err(AdminError::InvalidRequest),
                },
                _ => return Err(AdminError::InvalidRequest),
            }
        }

        request.dbname = dbname.ok_or(AdminError::InvalidRequest)?;
        Ok(request)
    }
}

fn lossy(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use strata_data::{DEFAULT_BUFFER_SIZE, DEFAULT_DURATION_LOG, DEFAULT_DURATION_NUM};

    fn request(entries: &[(&str, RequestValue)]) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.add_map_open();
        for (key, value) in entries {
            enc.add_raw_term(key.as_bytes());
            match value {
                RequestValue::Raw(s) => enc.add_raw(s.as_bytes()),
                RequestValue::Int(n) => enc.add_int64(*n),
            }
        }
        enc.add_map_close();
        enc.into_bytes().to_vec()
    }

    enum RequestValue {
        Raw(&'static str),
        Int(i64),
    }
    use RequestValue::{Int, Raw};

    #[test]
    fn creates_directory_and_files() {
        let root = TempDir::new().unwrap();
        let body = request(&[
            ("dbname", Raw("metrics")),
            ("time_precision", Raw("ms")),
            ("buffer_size", Int(2048)),
            ("duration_num", Raw("2w")),
            ("duration_log", Raw("3d")),
        ]);
        let config = new_database(root.path(), &body).unwrap();

        assert_eq!(config.dbname, "metrics");
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.duration_num, 2 * 604800 * 1000);
        assert_eq!(config.duration_log, 3 * 86400 * 1000);

        let dbpath = root.path().join("metrics");
        assert!(dbpath.join(DB_CONF_FN).is_file());
        assert!(dbpath.join(DB_DAT_FN).is_file());

        let dat = fs::read(dbpath.join(DB_DAT_FN)).unwrap();
        let mut dec = Decoder::new(&dat);
        assert_eq!(dec.next().unwrap(), Token::ArrayOpen);
        assert_eq!(dec.next().unwrap(), Token::Int64(SCHEMA_VERSION));
        assert_eq!(dec.next().unwrap(), Token::Raw(b"metrics"));
        assert_eq!(dec.next().unwrap(), Token::Int64(1)); // ms
        assert_eq!(dec.next().unwrap(), Token::Int64(2048));
    }

    #[test]
    fn defaults_apply_when_only_dbname_is_given() {
        let root = TempDir::new().unwrap();
        let body = request(&[("dbname", Raw("metrics"))]);
        let config = new_database(root.path(), &body).unwrap();
        assert_eq!(config.time_precision, TimePrecision::Second);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.duration_num, DEFAULT_DURATION_NUM);
        assert_eq!(config.duration_log, DEFAULT_DURATION_LOG);
    }

    #[test]
    fn duplicate_database_is_rejected() {
        let root = TempDir::new().unwrap();
        let body = request(&[("dbname", Raw("metrics"))]);
        new_database(root.path(), &body).unwrap();
        assert!(matches!(
            new_database(root.path(), &body),
            Err(AdminError::AlreadyExists(_))
        ));
    }

    #[test]
    fn invalid_values_leave_no_directory_behind() {
        let root = TempDir::new().unwrap();

        let cases: Vec<(Vec<u8>, &str)> = vec![
            (
                request(&[("dbname", Raw("1bad"))]),
                "invalid database name: '1bad'",
            ),
            (
                request(&[("dbname", Raw("db")), ("time_precision", Raw("days"))]),
                "invalid time precision: 'days' (expecting s, ms, us or ns)",
            ),
            (
                request(&[("dbname", Raw("db")), ("buffer_size", Int(100))]),
                "invalid buffer size: '100' (expecting a multiple of 512)",
            ),
            (
                request(&[("dbname", Raw("db")), ("duration_num", Raw("5x"))]),
                "invalid number duration: '5x' (valid examples: 6h, 2d or 1w)",
            ),
            (
                request(&[("dbname", Raw("db")), ("duration_log", Raw("0d"))]),
                "invalid log duration: '0d' (valid examples: 6h, 2d or 1w)",
            ),
        ];
        for (body, expected) in cases {
            let err = new_database(root.path(), &body).unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_key_is_an_invalid_request() {
        let root = TempDir::new().unwrap();
        let body = request(&[("dbname", Raw("db")), ("shoe_size", Int(43))]);
        assert!(matches!(
            new_database(root.path(), &body),
            Err(AdminError::InvalidRequest)
        ));
    }

    #[test]
    fn missing_dbname_is_an_invalid_request() {
        let root = TempDir::new().unwrap();
        let body = request(&[("buffer_size", Int(1024))]);
        assert!(matches!(
            new_database(root.path(), &body),
            Err(AdminError::InvalidRequest)
        ));
    }

    #[test]
    fn rollback_on_a_missing_path_only_logs() {
        let root = TempDir::new().unwrap();
        let never_created = root.path().join("no-such-db");
        rollback_new_database(&never_created);
        rollback_new_database(&never_created);
        assert!(!never_created.exists());
    }

    #[test]
    fn rollback_removes_a_partial_directory() {
        let root = TempDir::new().unwrap();
        let dbpath = root.path().join("partial");
        fs::create_dir(&dbpath).unwrap();
        fs::write(dbpath.join(DB_CONF_FN), "x").unwrap();
        rollback_new_database(&dbpath);
        assert!(!dbpath.exists());
    }
}
