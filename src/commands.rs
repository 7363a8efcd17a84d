//! Rewinder - Command Surface
//!
//! Boundary functions for a UI shell. Errors cross as readable strings;
//! a missing capture crosses as [`IMAGE_NOT_FOUND`], never as an empty
//! string.

use crate::api::RewinderEngine;
use crate::query::PathAnswer;
use crate::store::StoreStats;

/// Reserved answer for "no capture at this timestamp"
pub const IMAGE_NOT_FOUND: &str = "asset://localhost/";

fn to_message<E: std::fmt::Display>(e: E) -> String {
    e.to_string()
}

pub fn get_encryption_status(engine: &RewinderEngine) -> Result<bool, String> {
    Ok(engine.encryption_status())
}

pub fn get_periodic_capture_status(engine: &RewinderEngine) -> Result<bool, String> {
    Ok(engine.periodic_capture_status())
}

pub fn get_click_event_status(engine: &RewinderEngine) -> Result<bool, String> {
    Ok(engine.click_event_status())
}

pub async fn toggle_encryption(engine: &RewinderEngine, enable: bool) -> Result<bool, String> {
    engine.toggle_encryption(enable).await.map_err(to_message)
}

pub fn toggle_periodic_capture(engine: &RewinderEngine, enable: bool) -> Result<bool, String> {
    engine.toggle_periodic_capture(enable).map_err(to_message)
}

pub fn toggle_click_event(engine: &RewinderEngine, enable: bool) -> Result<bool, String> {
    engine.toggle_click_event(enable).map_err(to_message)
}

/// Base64 JPEG, or [`IMAGE_NOT_FOUND`]
pub async fn get_image_base64_from_timestamp(engine: &RewinderEngine, timestamp: i64) -> Result<String, String> {
    let image = engine.image_base64(timestamp).await.map_err(to_message)?;
    Ok(image.unwrap_or_else(|| IMAGE_NOT_FOUND.to_string()))
}

/// Base64 thumbnail JPEG, or [`IMAGE_NOT_FOUND`]
pub async fn get_thumbnail_base64_from_timestamp(engine: &RewinderEngine, timestamp: i64) -> Result<String, String> {
    let thumb = engine.thumbnail_base64(timestamp).await.map_err(to_message)?;
    Ok(thumb.unwrap_or_else(|| IMAGE_NOT_FOUND.to_string()))
}

/// Readable file path, or [`IMAGE_NOT_FOUND`]
pub async fn get_image_path_from_timestamp(engine: &RewinderEngine, timestamp: i64) -> Result<String, String> {
    match engine.image_path(timestamp).await.map_err(to_message)? {
        PathAnswer::Found(path) => Ok(path.display().to_string()),
        PathAnswer::NotFound => Ok(IMAGE_NOT_FOUND.to_string()),
    }
}

pub async fn clear_image_history(engine: &RewinderEngine) -> Result<(), String> {
    engine.clear_image_history().await.map(|_| ()).map_err(to_message)
}

pub async fn delete_credentials(engine: &RewinderEngine) -> Result<(), String> {
    engine.delete_credentials().await.map_err(to_message)
}

pub async fn store_credentials(engine: &RewinderEngine, secret: String) -> Result<(), String> {
    engine
        .store_credentials(secret.into_bytes())
        .await
        .map(|_| ())
        .map_err(to_message)
}

pub async fn generate_credentials(engine: &RewinderEngine) -> Result<(), String> {
    engine.generate_credentials().await.map(|_| ()).map_err(to_message)
}

pub async fn capture_now(engine: &RewinderEngine) -> Result<i64, String> {
    engine.capture_now().await.map_err(to_message)
}

pub async fn list_timestamps(engine: &RewinderEngine, limit: usize) -> Result<Vec<i64>, String> {
    engine.list_timestamps(limit).await.map_err(to_message)
}

pub async fn get_storage_stats(engine: &RewinderEngine) -> Result<StoreStats, String> {
    engine.stats().await.map_err(to_message)
}
