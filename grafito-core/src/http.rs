//! `apoc.load.*` file/HTTP loader (spec §4.8, §6).
//!
//! Backs `apoc.load.json`/`.jsonArray`/`.jsonParams`/`.xml`/`.xmlParams`/
//! `.html`: resolves a path, `file://` URL, or HTTP(S) URL, applies
//! compression detection by extension, and hands the decoded bytes back to
//! the caller for format-specific parsing. A pure GET with no headers,
//! payload, or auth is cached on disk under `GRAFITO_APOC_CACHE_DIR` when
//! that variable is set, keyed by the request URL.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use grafito_model::{Error, Result};

/// Options accepted by every `apoc.load.*` procedure, parsed out of the
/// optional trailing config map argument.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub method: Option<String>,
    pub payload: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retry: u32,
    pub fail_on_error: bool,
    pub headers: Vec<(String, String)>,
    pub auth: Option<(String, String)>,
}

impl LoadOptions {
    /// A pure GET with nothing beyond the URL is the only shape the cache
    /// keys on — headers, payload, or auth make the response
    /// request-specific and therefore uncacheable by URL alone.
    fn is_cacheable_request(&self) -> bool {
        self.payload.is_none()
            && self.headers.is_empty()
            && self.auth.is_none()
            && self.method.as_deref().is_none_or(|m| m.eq_ignore_ascii_case("GET"))
    }
}

/// Fetches `source`, resolving it as a local path, `file://` URL, or
/// HTTP(S) URL, and decompresses it if its extension names a compression
/// scheme this crate can decode.
pub fn fetch(source: &str, options: &LoadOptions) -> Result<Vec<u8>> {
    let raw = if let Some(path) = source.strip_prefix("file://") {
        read_local(Path::new(path))?
    } else if source.starts_with("http://") || source.starts_with("https://") {
        fetch_http(source, options)?
    } else {
        read_local(Path::new(source))?
    };
    decompress(source, raw)
}

fn read_local(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(Error::from)
}

fn cache_path(source: &str) -> Option<std::path::PathBuf> {
    let dir = std::env::var("GRAFITO_APOC_CACHE_DIR").ok()?;
    let digest = source.bytes().fold(0xcbf29ce484222325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    });
    Some(std::path::PathBuf::from(dir).join(format!("{digest:016x}")))
}

fn fetch_http(url: &str, options: &LoadOptions) -> Result<Vec<u8>> {
    let cacheable = options.is_cacheable_request();
    if cacheable && let Some(path) = cache_path(url)
        && let Ok(bytes) = std::fs::read(&path)
    {
        return Ok(bytes);
    }

    let mut attempts_left = options.retry.max(0) + 1;
    let mut last_err = None;
    while attempts_left > 0 {
        attempts_left -= 1;
        match perform_request(url, options) {
            Ok(bytes) => {
                if cacheable && let Some(path) = cache_path(url) {
                    if let Some(parent) = path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    let _ = std::fs::write(path, &bytes);
                }
                return Ok(bytes);
            }
            Err(e) => last_err = Some(e),
        }
    }
    let err = last_err.unwrap_or_else(|| Error::import("HTTP request failed with no attempts made"));
    if options.fail_on_error {
        Err(err)
    } else {
        Ok(Vec::new())
    }
}

fn perform_request(url: &str, options: &LoadOptions) -> Result<Vec<u8>> {
    let method = options.method.as_deref().unwrap_or("GET");
    let timeout = Duration::from_millis(options.timeout_ms.unwrap_or(30_000));

    let mut request = match method.to_ascii_uppercase().as_str() {
        "POST" => ureq::post(url),
        "PUT" => ureq::put(url),
        "DELETE" => ureq::delete(url),
        _ => ureq::get(url),
    }
    .timeout(timeout);

    for (key, value) in &options.headers {
        request = request.set(key, value);
    }
    if let Some((user, pass)) = &options.auth {
        let credentials = format!("{user}:{pass}");
        request = request.set("Authorization", &format!("Basic {}", base64_encode(credentials.as_bytes())));
    }

    let response = match &options.payload {
        Some(body) => request.send_string(body),
        None => request.call(),
    }
    .map_err(|e| Error::import(format!("HTTP request to {url} failed: {e}")))?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(Error::from)?;
    Ok(bytes)
}

const BASE64_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();
        out.push(BASE64_ALPHABET[(b0 >> 2) as usize] as char);
        out.push(BASE64_ALPHABET[(((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4)) as usize] as char);
        out.push(if b1.is_some() {
            BASE64_ALPHABET[(((b1.unwrap() & 0x0f) << 2) | (b2.unwrap_or(0) >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if b2.is_some() { BASE64_ALPHABET[(b2.unwrap() & 0x3f) as usize] as char } else { '=' });
    }
    out
}

/// Compression detected by extension (§6). Only gzip is actually decodable
/// with this workspace's dependency stack; `.bz2`/`.xz`/`.zip` are
/// recognized but rejected rather than silently passed through undecoded.
fn decompress(source: &str, bytes: Vec<u8>) -> Result<Vec<u8>> {
    let lower = source.to_ascii_lowercase();
    if lower.ends_with(".gz") {
        let mut decoder = flate2::read::GzDecoder::new(bytes.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(Error::from)?;
        Ok(out)
    } else if lower.ends_with(".bz2") || lower.ends_with(".xz") || lower.ends_with(".zip") {
        Err(Error::configuration(format!(
            "compression format of {source} is not supported (only .gz is decodable)"
        )))
    } else {
        Ok(bytes)
    }
}

/// Parses an XML document into the nested map/list shape `apoc.load.xml`
/// returns: each element becomes a map with `_type` (the tag name), one
/// entry per attribute, and either `_text` or a `_children` list.
pub fn parse_xml(bytes: &[u8]) -> Result<grafito_model::Value> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<(String, BTreeMap<String, grafito_model::Value>, Vec<grafito_model::Value>)> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(|e| Error::import(e.to_string()))? {
            Event::Start(tag) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).to_string();
                let mut attrs = BTreeMap::new();
                for attr in tag.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    let value = attr.unescape_value().unwrap_or_default().to_string();
                    attrs.insert(key, grafito_model::Value::String(value));
                }
                stack.push((name, attrs, Vec::new()));
            }
            Event::Text(text) => {
                let content = text.unescape().unwrap_or_default().trim().to_string();
                if !content.is_empty() && let Some((_, attrs, _)) = stack.last_mut() {
                    attrs.insert("_text".to_string(), grafito_model::Value::String(content));
                }
            }
            Event::End(_) => {
                if let Some((name, mut attrs, children)) = stack.pop() {
                    attrs.insert("_type".to_string(), grafito_model::Value::String(name));
                    if !children.is_empty() {
                        attrs.insert("_children".to_string(), grafito_model::Value::List(children));
                    }
                    let node = grafito_model::Value::Map(grafito_model::PropertyMap::from_pairs(attrs.into_iter().collect()));
                    if let Some((_, _, parent_children)) = stack.last_mut() {
                        parent_children.push(node);
                    } else {
                        root = Some(node);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| Error::import("XML document had no root element"))
}
