//! アップロードファイルとリクエストボディの解析

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use serde_json::Value;

use crate::error::Error;
use super::utils::{is_json_content_type, parse_query_string};

/// multipart/form-data で受け取ったファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    field: String,
    client_filename: Option<String>,
    client_media_type: Option<String>,
    data: Bytes,
}

impl UploadedFile {
    pub fn new(
        field: impl Into<String>,
        client_filename: Option<String>,
        client_media_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            field: field.into(),
            client_filename,
            client_media_type,
            data: data.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn client_filename(&self) -> Option<&str> {
        self.client_filename.as_deref()
    }

    pub fn client_media_type(&self) -> Option<&str> {
        self.client_media_type.as_deref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// ファイル内容を指定パスへ書き出す
    pub fn move_to(&self, target: impl AsRef<Path>) -> Result<(), Error> {
        fs::write(target.as_ref(), &self.data)?;
        Ok(())
    }
}

/// Content-Type に応じて解析したボディ
#[derive(Debug, Default)]
pub struct ParsedBody {
    pub fields: HashMap<String, Value>,
    pub files: HashMap<String, UploadedFile>,
}

/// Content-Type を見てボディを解析する
///
/// 対応していない Content-Type や空ボディは空の結果を返す。
/// JSON や multipart の構文エラーは 400 のタグ付きエラーになる。
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<ParsedBody, Error> {
    let content_type = match content_type {
        Some(ct) if !body.is_empty() => ct,
        _ => return Ok(ParsedBody::default()),
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime == "application/x-www-form-urlencoded" {
        let text = String::from_utf8_lossy(body);
        let fields = parse_query_string(&text)
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Ok(ParsedBody { fields, files: HashMap::new() });
    }

    if is_json_content_type(content_type) {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::bad_request(format!("Malformed JSON body: {}", e)))?;
        // オブジェクト以外（配列やスカラー）はフィールドとして展開しない
        let fields = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        return Ok(ParsedBody { fields, files: HashMap::new() });
    }

    if mime == "multipart/form-data" {
        let boundary = boundary_from_content_type(content_type)
            .ok_or_else(|| Error::bad_request("multipart/form-data without boundary"))?;
        return parse_multipart(body, &boundary);
    }

    Ok(ParsedBody::default())
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// multipart/form-data ボディを解析する
pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<ParsedBody, Error> {
    let delimiter = format!("--{}", boundary);
    let mut parsed = ParsedBody::default();

    let mut cursor = find(body, delimiter.as_bytes(), 0)
        .ok_or_else(|| Error::bad_request("multipart boundary not found"))?;

    loop {
        cursor += delimiter.len();
        // 終端 "--boundary--"
        if body[cursor..].starts_with(b"--") {
            break;
        }
        cursor = skip_crlf(body, cursor);

        let next = find(body, delimiter.as_bytes(), cursor)
            .ok_or_else(|| Error::bad_request("unterminated multipart body"))?;
        let part = trim_trailing_crlf(&body[cursor..next]);
        parse_part(part, &mut parsed)?;
        cursor = next;
    }

    Ok(parsed)
}

fn parse_part(part: &[u8], parsed: &mut ParsedBody) -> Result<(), Error> {
    let split = find(part, b"\r\n\r\n", 0)
        .ok_or_else(|| Error::bad_request("multipart part without header terminator"))?;
    let head = String::from_utf8_lossy(&part[..split]);
    let content = &part[split + 4..];

    let mut name = None;
    let mut filename = None;
    let mut media_type = None;

    for line in head.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        if key.eq_ignore_ascii_case("Content-Disposition") {
            for param in value.split(';').skip(1) {
                if let Some((k, v)) = param.trim().split_once('=') {
                    let v = v.trim().trim_matches('"').to_string();
                    match k.trim().to_ascii_lowercase().as_str() {
                        "name" => name = Some(v),
                        "filename" => filename = Some(v),
                        _ => {}
                    }
                }
            }
        } else if key.eq_ignore_ascii_case("Content-Type") {
            media_type = Some(value.trim().to_string());
        }
    }

    let name = name.ok_or_else(|| Error::bad_request("multipart part without name"))?;
    match filename {
        Some(filename) => {
            let file = UploadedFile::new(
                name.clone(),
                Some(filename),
                media_type,
                Bytes::copy_from_slice(content),
            );
            parsed.files.insert(name, file);
        }
        None => {
            let text = String::from_utf8_lossy(content).into_owned();
            parsed.fields.insert(name, Value::String(text));
        }
    }
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn skip_crlf(body: &[u8], at: usize) -> usize {
    if body[at..].starts_with(b"\r\n") {
        at + 2
    } else {
        at
    }
}

fn trim_trailing_crlf(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n").unwrap_or(part)
}
