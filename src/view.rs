use std::collections::HashSet;

use crate::normalize::MediaRecord;

/// A record joined with the per-view flags a renderer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifView {
    pub record: MediaRecord,
    pub playing: bool,
    pub saved: bool,
}

/// Transient playback state, keyed by permalink.
#[derive(Debug, Default, Clone)]
pub struct ViewState {
    playing: HashSet<String>,
}

impl ViewState {
    pub fn start_playing(&mut self, permalink: &str) {
        self.playing.insert(permalink.to_string());
    }

    pub fn stop_playing(&mut self, permalink: &str) {
        self.playing.remove(permalink);
    }

    pub fn is_playing(&self, permalink: &str) -> bool {
        self.playing.contains(permalink)
    }

    pub fn decorate(&self, records: &[MediaRecord], saved: &[MediaRecord]) -> Vec<GifView> {
        let saved: HashSet<&str> = saved.iter().map(|r| r.permalink.as_str()).collect();
        records
            .iter()
            .map(|record| GifView {
                playing: self.playing.contains(&record.permalink),
                saved: saved.contains(record.permalink.as_str()),
                record: record.clone(),
            })
            .collect()
    }

    /// Saved records, newest first.
    pub fn decorate_saved(&self, saved: &[MediaRecord]) -> Vec<GifView> {
        let mut rows = self.decorate(saved, saved);
        rows.reverse();
        rows
    }
}
