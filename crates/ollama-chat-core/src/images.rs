//! Image attachments: uploaded images and the selection for the next message

use std::collections::BTreeSet;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::error::{ChatError, Result};

/// Read a file and encode it as a `data:<mime>;base64,<payload>` URL
pub async fn encode_image(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| ChatError::Image {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), bytes = bytes.len(), "image encoded");
    Ok(format!("data:{};base64,{}", mime_for(path), STANDARD.encode(bytes)))
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Strip the `data:...;base64,` scheme prefix, leaving the bare payload
pub fn strip_data_url(data_url: &str) -> &str {
    data_url
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or(data_url)
}

#[derive(Debug, Clone, Default)]
pub struct ImageAttachments {
    uploaded: Vec<String>,
    selected: BTreeSet<usize>,
}

impl ImageAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data_url: String) -> usize {
        self.uploaded.push(data_url);
        self.uploaded.len() - 1
    }

    pub fn uploaded(&self) -> &[String] {
        &self.uploaded
    }

    pub fn len(&self) -> usize {
        self.uploaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }

    /// Add or remove an image from the selection. Returns whether it is now selected.
    pub fn toggle_selection(&mut self, index: usize) -> bool {
        if index >= self.uploaded.len() {
            return false;
        }
        if !self.selected.remove(&index) {
            self.selected.insert(index);
            true
        } else {
            false
        }
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected.contains(&index)
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Payloads of the selected images, in upload order, prefix stripped
    pub fn selected_payloads(&self) -> Vec<String> {
        self.uploaded
            .iter()
            .enumerate()
            .filter(|(i, _)| self.selected.contains(i))
            .map(|(_, url)| strip_data_url(url).to_string())
            .collect()
    }

    /// Drop an uploaded image, shifting later selections down by one
    pub fn remove(&mut self, index: usize) -> Option<String> {
        if index >= self.uploaded.len() {
            return None;
        }
        let removed = self.uploaded.remove(index);
        self.selected = self
            .selected
            .iter()
            .filter(|&&i| i != index)
            .map(|&i| if i > index { i - 1 } else { i })
            .collect();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn four_images() -> ImageAttachments {
        let mut images = ImageAttachments::new();
        for payload in ["AAA", "BBB", "CCC", "DDD"] {
            images.push(format!("data:image/png;base64,{}", payload));
        }
        images
    }

    #[test]
    fn test_selected_payloads_keep_upload_order() {
        let mut images = four_images();
        images.toggle_selection(3);
        images.toggle_selection(1);

        assert_eq!(images.selected_payloads(), vec!["BBB", "DDD"]);
    }

    #[test]
    fn test_toggle_twice_deselects() {
        let mut images = four_images();
        assert!(images.toggle_selection(2));
        assert!(!images.toggle_selection(2));
        assert!(images.selected_payloads().is_empty());
    }

    #[test]
    fn test_toggle_out_of_range_is_ignored() {
        let mut images = four_images();
        assert!(!images.toggle_selection(9));
        assert_eq!(images.selected_count(), 0);
    }

    #[test]
    fn test_remove_shifts_selection() {
        let mut images = four_images();
        images.toggle_selection(0);
        images.toggle_selection(3);

        images.remove(1);

        assert!(images.is_selected(0));
        assert!(images.is_selected(2));
        assert_eq!(images.selected_payloads(), vec!["AAA", "DDD"]);
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/jpeg;base64,Zm9v"), "Zm9v");
        assert_eq!(strip_data_url("Zm9v"), "Zm9v");
    }

    #[tokio::test]
    async fn test_encode_image_builds_data_url() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pixel.PNG");
        std::fs::write(&path, b"foo").unwrap();

        let url = encode_image(&path).await.unwrap();

        assert_eq!(url, "data:image/png;base64,Zm9v");
    }

    #[tokio::test]
    async fn test_encode_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = encode_image(dir.path().join("missing.png")).await.unwrap_err();
        assert!(matches!(err, ChatError::Image { .. }));
    }
}
