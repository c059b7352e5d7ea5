//! Gallery interchange format
//!
//! A JSON array of `{ "id", "name", "descriptor", "image" }` objects.
//! `descriptor` holds the raw embedding and `image` the thumbnail as a
//! base64 data URI. Decoding is strict: the first bad element rejects the
//! whole document.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::error::ImportError;
use crate::pipeline::types::{Embedding, EMBEDDING_DIM};
use crate::utils::image::parse_data_uri;

use super::gallery::{GalleryEntry, Thumbnail};

#[derive(Serialize)]
struct GalleryRecord<'a> {
    id: &'a str,
    name: &'a str,
    descriptor: &'a [f32],
    image: String,
}

pub fn encode(entries: &[GalleryEntry]) -> Result<Vec<u8>> {
    let records: Vec<_> = entries
        .iter()
        .map(|e| GalleryRecord {
            id: &e.id,
            name: &e.name,
            descriptor: e.embedding.as_slice(),
            image: e.thumbnail.to_data_uri(),
        })
        .collect();
    Ok(serde_json::to_vec_pretty(&records)?)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<GalleryEntry>, ImportError> {
    let document: Value =
        serde_json::from_slice(bytes).map_err(|e| ImportError::InvalidJson(e.to_string()))?;
    let Value::Array(items) = document else {
        return Err(ImportError::NotASequence);
    };

    let mut seen = HashSet::with_capacity(items.len());
    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let entry = decode_entry(item)
            .map_err(|reason| ImportError::MalformedEntry { index, reason })?;
        if !seen.insert(entry.id.clone()) {
            return Err(ImportError::DuplicateId { index, id: entry.id });
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn decode_entry(item: &Value) -> Result<GalleryEntry, String> {
    let object = item.as_object().ok_or("not an object")?;
    let text_field = |key: &str| -> Result<String, String> {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("`{key}` must be a string"))
    };

    let id = text_field("id")?;
    if id.is_empty() {
        return Err("`id` is empty".to_string());
    }
    let name = text_field("name")?;

    let descriptor = object
        .get("descriptor")
        .and_then(Value::as_array)
        .ok_or("`descriptor` must be an array")?;
    if descriptor.len() != EMBEDDING_DIM {
        return Err(format!(
            "`descriptor` has {} values, expected {}",
            descriptor.len(),
            EMBEDDING_DIM
        ));
    }
    let values = descriptor
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|x| x as f32)
                .filter(|x| x.is_finite())
                .ok_or("`descriptor` values must be finite numbers")
        })
        .collect::<Result<Vec<f32>, _>>()?;
    let embedding = Embedding::new(values).map_err(|e| e.to_string())?;

    let (mime, bytes) = parse_data_uri(&text_field("image")?).map_err(|e| format!("`image`: {e}"))?;

    Ok(GalleryEntry {
        id,
        name,
        embedding,
        thumbnail: Thumbnail::new(mime, bytes),
    })
}
