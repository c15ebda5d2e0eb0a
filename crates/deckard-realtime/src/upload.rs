//! Image Chunk Uploader
//!
//! Splits an already-encoded image payload (typically a data URL) into
//! `image_start` / `image_chunk`* / `image_end` frames so no single frame
//! exceeds the practical size of one protocol message.

use deckard_realtime_types::ClientMessage;

pub const DEFAULT_IMAGE_CHUNK_SIZE: usize = 60_000;
pub const DEFAULT_IMAGE_PROMPT: &str = "Please describe this image.";

/// A single upload. Transient: consumed by [`ImageUploadJob::into_frames`].
#[derive(Debug, Clone)]
pub struct ImageUploadJob {
    pub id: String,
    pub payload: String,
    pub prompt: String,
    cursor: usize,
}

impl ImageUploadJob {
    /// Creates a job with a fresh identifier. An empty prompt falls back to
    /// [`DEFAULT_IMAGE_PROMPT`].
    pub fn new(payload: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let prompt = if prompt.trim().is_empty() {
            DEFAULT_IMAGE_PROMPT.to_string()
        } else {
            prompt
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload: payload.into(),
            prompt,
            cursor: 0,
        }
    }

    /// Produces every frame of the job, in transmission order.
    pub fn into_frames(mut self, chunk_size: usize) -> Vec<ClientMessage> {
        let mut frames = vec![ClientMessage::ImageStart {
            id: self.id.clone(),
            text: self.prompt.clone(),
        }];
        let chunks = split_chunks(&self.payload, chunk_size);
        for chunk in chunks {
            self.cursor += chunk.len();
            frames.push(ClientMessage::ImageChunk {
                id: self.id.clone(),
                chunk: chunk.to_string(),
            });
        }
        debug_assert_eq!(self.cursor, self.payload.len());
        frames.push(ClientMessage::ImageEnd { id: self.id });
        frames
    }
}

/// Splits `payload` into contiguous slices of at most `chunk_size` characters.
///
/// Slices never cut through a UTF-8 code point. An empty payload yields one
/// empty slice so that a job always carries at least one chunk.
pub fn split_chunks(payload: &str, chunk_size: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    if payload.is_empty() {
        return vec![""];
    }
    let mut chunks = Vec::with_capacity(payload.len() / chunk_size + 1);
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in payload.char_indices() {
        if count == chunk_size {
            chunks.push(&payload[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&payload[start..]);
    chunks
}
