//! Writes flows as CSV rows.

use async_trait::async_trait;
use model::{EnrichedFlow, FIELD_NAMES};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::base::{BaseSegment, Segment, SegmentConfig, SegmentError};

/// CSV exporter to stdout or `filename`. The `fields` config key selects and
/// orders columns (comma-separated, default: every field); a header row is
/// written first.
pub struct Csv {
    base: BaseSegment,
    filename: Option<String>,
    fields: Vec<String>,
}

impl Csv {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let filename = config
            .get("filename")
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        let fields: Vec<String> = match config.get("fields") {
            Some(raw) => raw
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            None => FIELD_NAMES.iter().map(|n| n.to_string()).collect(),
        };
        if fields.is_empty() {
            return Err(SegmentError::MissingConfig {
                segment: "csv",
                key: "fields",
            });
        }
        let probe = EnrichedFlow::default();
        for name in &fields {
            if probe.field_display(name).is_none() {
                return Err(SegmentError::InvalidConfig {
                    segment: "csv",
                    key: "fields",
                    value: name.clone(),
                    reason: "unknown flow field".into(),
                });
            }
        }
        Ok(Self {
            base: BaseSegment::default(),
            filename,
            fields,
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

    fn encode_row<I, S>(cells: I) -> Result<Vec<u8>, csv::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(cells)?;
        writer
            .into_inner()
            .map_err(|err| err.into_error().into())
    }
}

#[async_trait]
impl Segment for Csv {
    fn name(&self) -> &'static str {
        "csv"
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
                tracing::error!(segment = "csv", error = %err, "sink not writable, shutting down pipeline");
                self.base.shutdown_parent_pipeline();
                return;
            }
        };
        match Self::encode_row(self.fields.iter().map(String::as_bytes)) {
            Ok(header) => {
                if let Err(err) = sink.write_all(&header).await {
                    tracing::warn!(segment = "csv", error = %err, "header write failed");
                }
            }
            Err(err) => tracing::warn!(segment = "csv", error = %err, "could not encode header"),
        }
        while let Some(flow) = input.recv().await {
            let cells: Vec<String> = self
                .fields
                .iter()
                .map(|name| flow.field_display(name).unwrap_or_default())
                .collect();
            match Self::encode_row(cells.iter().map(String::as_bytes)) {
                Ok(row) => {
                    if let Err(err) = sink.write_all(&row).await {
                        tracing::warn!(segment = "csv", error = %err, "write failed, dropping record");
                    }
                }
                Err(err) => tracing::warn!(segment = "csv", error = %err, "could not encode flow"),
            }
            if output.send(flow).await.is_err() {
                break;
            }
        }
        if let Err(err) = sink.flush().await {
            tracing::warn!(segment = "csv", error = %err, "flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, test_segment};
    use model::FlowType;

    #[tokio::test]
    async fn writes_header_and_rows() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let path = file.path().to_str().expect("utf8 path").to_string();
        let flow = EnrichedFlow {
            flow_type: FlowType::NetflowV9,
            proto: 45,
            bytes: 12,
            ..Default::default()
        };
        let result = test_segment(
            "csv",
            &config(&[("filename", &path), ("fields", "proto,bytes")]),
            flow,
        )
        .await
        .expect("flow forwarded");
        assert_eq!(result.flow_type, FlowType::NetflowV9);

        let written = std::fs::read_to_string(&path).expect("file readable");
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("proto,bytes"));
        assert_eq!(lines.next(), Some("45,12"));
    }

    #[test]
    fn unknown_field_aborts_build() {
        let result = Csv::from_config(&config(&[("fields", "proto,wat")]));
        assert!(result.is_err());
    }
}
