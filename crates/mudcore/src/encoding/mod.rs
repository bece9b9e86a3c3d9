//! 字元集編解碼模組
//!
//! 伺服器輸出的位元組依 session 設定的字元集轉為文字，
//! 送出的文字也用同一字元集編碼。台灣 MUD 常用 Big5。

use std::fmt;
use std::str::FromStr;

use encoding_rs::{Encoding, BIG5, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("不支援的字元集: {0}")]
pub struct UnknownCharset(pub String);

/// 支援的字元集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    Big5,
    #[serde(alias = "windows-1252")]
    Latin1,
}

impl Charset {
    fn encoding(self) -> &'static Encoding {
        match self {
            Self::Utf8 => UTF_8,
            Self::Big5 => BIG5,
            Self::Latin1 => WINDOWS_1252,
        }
    }

    /// 將位元組轉為字串（無效字元會被替換為 U+FFFD）
    pub fn decode(self, bytes: &[u8]) -> String {
        let (decoded, _, _) = self.encoding().decode(bytes);
        decoded.into_owned()
    }

    /// 將字串編碼為位元組（無法編碼的字元會被替換）
    pub fn encode(self, text: &str) -> Vec<u8> {
        let (encoded, _, _) = self.encoding().encode(text);
        encoded.into_owned()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Utf8 => "utf-8",
            Self::Big5 => "big5",
            Self::Latin1 => "latin1",
        };
        f.write_str(name)
    }
}

impl FromStr for Charset {
    type Err = UnknownCharset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "big5" => Ok(Self::Big5),
            "latin1" | "windows-1252" => Ok(Self::Latin1),
            _ => Err(UnknownCharset(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_big5_chinese() {
        // "你好" in Big5: 0xa7 0x41 0xa6 0x6e
        let big5_bytes = [0xa7, 0x41, 0xa6, 0x6e];
        assert_eq!(Charset::Big5.decode(&big5_bytes), "你好");
    }

    #[test]
    fn test_decode_big5_mixed() {
        let mixed: Vec<u8> = [b"Hi".as_slice(), &[0xa7, 0x41, 0xa6, 0x6e]].concat();
        assert_eq!(Charset::Big5.decode(&mixed), "Hi你好");
    }

    #[test]
    fn test_encode_big5_chinese() {
        assert_eq!(Charset::Big5.encode("你好"), vec![0xa7, 0x41, 0xa6, 0x6e]);
    }

    #[test]
    fn test_latin1() {
        assert_eq!(Charset::Latin1.decode(&[0xe9]), "é");
        assert_eq!(Charset::Latin1.encode("é"), vec![0xe9]);
    }

    #[test]
    fn test_utf8_invalid_is_replaced() {
        assert_eq!(Charset::Utf8.decode(&[b'a', 0xff]), "a\u{fffd}");
    }

    #[test]
    fn test_parse_charset() {
        assert_eq!("BIG5".parse::<Charset>(), Ok(Charset::Big5));
        assert_eq!("utf8".parse::<Charset>(), Ok(Charset::Utf8));
        assert!("ebcdic".parse::<Charset>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Charset::Utf8).unwrap();
        assert_eq!(json, "\"utf-8\"");
        let parsed: Charset = serde_json::from_str("\"big5\"").unwrap();
        assert_eq!(parsed, Charset::Big5);
    }
}
