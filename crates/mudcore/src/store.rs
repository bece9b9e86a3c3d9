//! sled 儲存的共用部分（地圖與輸出紀錄）

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::TransactionError;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("資料庫錯誤: {0}")]
    Sled(#[from] sled::Error),

    #[error("紀錄編碼錯誤: {0}")]
    Json(#[from] serde_json::Error),

    #[error("交易中止: {0}")]
    Aborted(String),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Self::Sled(e),
        }
    }
}

/// 開啟（或建立）資料庫目錄
pub fn open_db(path: &Path) -> Result<sled::Db, StoreError> {
    debug!("開啟資料庫 {}", path.display());
    Ok(sled::open(path)?)
}

/// 不落地的暫存資料庫
pub fn temporary_db() -> Result<sled::Db, StoreError> {
    Ok(sled::Config::new().temporary(true).open()?)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_record() {
        let bytes = encode(&vec!["a", "b"]).unwrap();
        let back: Vec<String> = decode(&bytes).unwrap();
        assert_eq!(back, vec!["a", "b"]);
        assert!(matches!(decode::<Vec<String>>(b"{"), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_open_db_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir.path().join("world")).unwrap();
        db.insert("k", "v").unwrap();
        assert_eq!(db.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_abort_unwraps_inner_error() {
        let err: StoreError =
            TransactionError::Abort(StoreError::Aborted("x".into())).into();
        assert_eq!(err.to_string(), "交易中止: x");
    }
}
