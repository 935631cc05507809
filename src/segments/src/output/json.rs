//! Writes flows as JSON lines, the encoding the `stdin` segment reads back.

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::base::{BaseSegment, Segment, SegmentConfig, SegmentError};

/// JSON line exporter: one record per line to stdout or `filename`.
pub struct Json {
    base: BaseSegment,
    filename: Option<String>,
}

impl Json {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let filename = config
            .get("filename")
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        Ok(Self {
            base: BaseSegment::default(),
            filename,
        })
    }

    async fn open_sink(&self) -> std::io::Result<Box<dyn AsyncWrite + Send + Unpin>> {
        match &self.filename {
            Some(filename) => {
                let file = File::create(filename).await?;
                Ok(Box::new(BufWriter::new(file)))
            }
            None => Ok(Box::new(tokio::io::stdout())),
        }
    }
}

#[async_trait]
impl Segment for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        let mut sink = match self.open_sink().await {
            Ok(sink) => sink,
            Err(err) => {
                tracing::error!(segment = "json", error = %err, "sink not writable, shutting down pipeline");
                self.base.shutdown_parent_pipeline();
                return;
            }
        };
        while let Some(flow) = input.recv().await {
            match serde_json::to_vec(flow.as_ref()) {
                Ok(mut line) => {
                    line.push(b'\n');
                    if let Err(err) = sink.write_all(&line).await {
                        tracing::warn!(segment = "json", error = %err, "write failed, dropping record");
                    }
                }
                Err(err) => {
                    tracing::warn!(segment = "json", error = %err, "could not encode flow");
                }
            }
            if output.send(flow).await.is_err() {
                break;
            }
        }
        if let Err(err) = sink.flush().await {
            tracing::warn!(segment = "json", error = %err, "flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{config, test_segment};
    use model::{EnrichedFlow, FlowType};

    #[tokio::test]
    async fn writes_and_forwards() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let path = file.path().to_str().expect("utf8 path").to_string();
        let flow = EnrichedFlow {
            flow_type: FlowType::NetflowV9,
            bytes: 5,
            ..Default::default()
        };
        let result = test_segment("json", &config(&[("filename", &path)]), flow)
            .await
            .expect("flow forwarded");
        assert_eq!(result.flow_type, FlowType::NetflowV9);

        let written = std::fs::read_to_string(&path).expect("file readable");
        let decoded: EnrichedFlow =
            serde_json::from_str(written.lines().next().expect("one line")).expect("valid json");
        assert_eq!(decoded.bytes, 5);
    }
}
