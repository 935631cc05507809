//! Reads JSON-encoded flows line-by-line from stdin or a file.

use async_trait::async_trait;
use model::EnrichedFlow;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::base::{parse_optional, BaseSegment, Segment, SegmentConfig, SegmentError};

/// Injects flows decoded from JSON lines, one record per line, in the
/// encoding the `json` output segment writes. Upstream records are forwarded
/// unchanged, so the segment can sit anywhere in a chain.
///
/// Config: `filename` (default: read stdin) and `eofcloses` — when true, end
/// of the input file gracefully shuts the whole pipeline down.
pub struct StdIn {
    base: BaseSegment,
    filename: Option<String>,
    eof_closes: bool,
}

impl StdIn {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let filename = config
            .get("filename")
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        if let Some(filename) = &filename {
            // Catch unreadable paths at build time; the file is opened in run.
            std::fs::metadata(filename).map_err(|source| SegmentError::Io {
                segment: "stdin",
                source,
            })?;
        } else {
            tracing::info!(segment = "stdin", "`filename` unset, reading stdin");
        }
        let eof_closes = parse_optional::<bool>(config, "stdin", "eofcloses")?.unwrap_or(false);
        Ok(Self {
            base: BaseSegment::default(),
            filename,
            eof_closes,
        })
    }

    async fn open_source(
        &self,
    ) -> std::io::Result<Box<dyn AsyncBufRead + Send + Unpin>> {
        match &self.filename {
            Some(filename) => {
                let file = File::open(filename).await?;
                Ok(Box::new(BufReader::new(file)))
            }
            None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
        }
    }
}

fn decode_line(line: &str) -> Option<Box<EnrichedFlow>> {
    match serde_json::from_str::<EnrichedFlow>(line) {
        Ok(flow) => Some(Box::new(flow)),
        Err(err) => {
            tracing::warn!(segment = "stdin", error = %err, "skipping undecodable line");
            None
        }
    }
}

#[async_trait]
impl Segment for StdIn {
    fn name(&self) -> &'static str {
        "stdin"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        let source = match self.open_source().await {
            Ok(source) => source,
            Err(err) => {
                tracing::error!(segment = "stdin", error = %err, "input not readable, shutting down pipeline");
                self.base.shutdown_parent_pipeline();
                return;
            }
        };
        let mut lines = source.lines();
        loop {
            tokio::select! {
                received = input.recv() => match received {
                    Some(flow) => {
                        if output.send(flow).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if let Some(flow) = decode_line(&line) {
                            if output.send(flow).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(segment = "stdin", error = %err, "read error, stopping input");
                        break;
                    }
                },
            }
        }
        // End of file. Optionally close the pipeline, then keep the chain
        // intact by forwarding upstream records until our input closes.
        if self.eof_closes {
            tracing::info!(segment = "stdin", "input exhausted, closing pipeline");
            self.base.shutdown_parent_pipeline();
        }
        while let Some(flow) = input.recv().await {
            if output.send(flow).await.is_err() {
                break;
            }
        }
    }
}
