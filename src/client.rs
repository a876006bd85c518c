use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::blocking::Client;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts captured frames and log lines to the relay server.
pub struct FrameUploader {
    http: Client,
    upload_url: String,
    log_url: String,
}

impl FrameUploader {
    pub fn new(server_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let base = server_url.trim_end_matches('/');
        Ok(Self {
            http,
            upload_url: format!("{base}/upload"),
            log_url: format!("{base}/log"),
        })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn log_url(&self) -> &str {
        &self.log_url
    }

    pub fn send_frame(&self, jpeg: Vec<u8>) -> Result<()> {
        self.http
            .post(&self.upload_url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()
            .context("failed to send frame")?
            .error_for_status()
            .context("server rejected frame")?;
        Ok(())
    }

    pub fn send_log(&self, message: &str) -> Result<()> {
        self.http
            .post(&self.log_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(message.to_string())
            .send()
            .context("failed to send log line")?
            .error_for_status()
            .context("server rejected log line")?;
        Ok(())
    }
}

/// Counts frames over one-second windows.
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    /// Records one frame. Returns the frame count of the window that just
    /// closed, at most once per second.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        if now.duration_since(self.window_start) < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames;
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

/// Interprets a wake-up payload: `1` starts capture, `0` stops it.
pub fn parse_wakeup(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?;
    match text.trim().parse::<i64>().ok()? {
        1 => Some(true),
        0 => Some(false),
        _ => None,
    }
}
