/// VCF header streaming and sample checks.
///
/// The header is read from the front of a (usually bgzipped) remote VCF. Raw chunks are
/// accumulated and the whole buffer is decompressed again after every chunk, so a truncated
/// gzip member at the end of the buffer is just "not enough data yet". Reading stops as soon as
/// the `#CHROM` line is complete, which keeps memory bounded by the header rather than the file.

use std::io::{self, Read};
use std::process::Stdio;

use flate2::read::MultiGzDecoder;
use futures::{Stream, StreamExt};
use log::{debug, error, info};
use thiserror::Error;
use tokio::process::Command;

use crate::config::defs::{
    PipelineError, AWS_TAG, HEADER_CHUNK_SIZE, MAX_HEADER_BYTES, VCF_COLUMN_LINE, VCF_FIXED_COLUMNS,
    VCF_HEADER_MARKER,
};
use crate::utils::command::aws;
use crate::utils::file::has_gzip_magic;
use crate::utils::remote::RemoteLocation;
use crate::utils::streams::chunk_stream;
use crate::utils::transfer::LocationResolver;

#[derive(Error, Debug, PartialEq)]
pub enum HeaderError {
    #[error("stream ended before the {} line was found", VCF_COLUMN_LINE)]
    EofBeforeHeader,

    #[error("line {line_number} is not a header line but precedes {}: '{line}'", VCF_COLUMN_LINE)]
    MalformedHeader { line_number: usize, line: String },

    #[error("decompression failed: {0}")]
    DecompressionError(String),

    #[error("no #CHROM line within the first {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("read failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VcfHeader {
    lines: Vec<String>,
}

impl VcfHeader {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The `#CHROM` line; always the last header line.
    pub fn column_line(&self) -> &str {
        self.lines.last().map(|l| l.as_str()).unwrap_or("")
    }

    /// Every column after the nine fixed columns
    /// (`#CHROM POS ID REF ALT QUAL FILTER INFO FORMAT`).
    pub fn sample_names(&self) -> Vec<String> {
        self.column_line()
            .trim_end()
            .split('\t')
            .skip(VCF_FIXED_COLUMNS)
            .map(|s| s.to_string())
            .collect()
    }

    pub fn declares_format(&self, field_id: &str) -> bool {
        let with_comma = format!("##FORMAT=<ID={},", field_id);
        let bare = format!("##FORMAT=<ID={}>", field_id);
        self.lines
            .iter()
            .any(|l| l.starts_with(&with_comma) || l.starts_with(&bare))
    }
}


struct Decoded {
    text: Vec<u8>,
    error: Option<String>,
}

/// Decompresses as much of `raw` as possible. Truncation is not an error here.
fn decode_prefix(raw: &[u8]) -> Decoded {
    if raw.len() < 2 {
        // Too short to tell gzip from plain text.
        return Decoded { text: Vec::new(), error: None };
    }
    if !has_gzip_magic(raw) {
        return Decoded { text: raw.to_vec(), error: None };
    }

    let mut decoder = MultiGzDecoder::new(raw);
    let mut text = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) => return Decoded { text, error: None },
            Ok(n) => text.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Decoded { text, error: None },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Decoded { text, error: Some(e.to_string()) },
        }
    }
}

/// Scans decoded text for a complete header. A trailing line without a newline only counts once
/// the stream is exhausted.
fn scan_header(text: &[u8], finished: bool) -> Result<Option<VcfHeader>, HeaderError> {
    let mut lines = Vec::new();
    let mut rest = text;
    let mut line_number = 0;

    loop {
        let (line, complete) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                let line = &rest[..i];
                rest = &rest[i + 1..];
                (line, true)
            }
            None => (rest, false),
        };
        if !complete && (!finished || line.is_empty()) {
            return Ok(None);
        }

        line_number += 1;
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if line.starts_with(VCF_COLUMN_LINE) {
            lines.push(line.to_string());
            return Ok(Some(VcfHeader { lines }));
        }
        if !line.starts_with(VCF_HEADER_MARKER) {
            return Err(HeaderError::MalformedHeader { line_number, line: line.to_string() });
        }
        lines.push(line.to_string());

        if !complete {
            return Ok(None);
        }
    }
}

/// Reads chunks until the header is complete.
pub async fn read_header<S>(mut chunks: S) -> Result<VcfHeader, HeaderError>
where
    S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
{
    let mut raw: Vec<u8> = Vec::new();
    let mut chunk_count = 0usize;

    loop {
        let finished = match chunks.next().await {
            Some(Ok(chunk)) => {
                chunk_count += 1;
                raw.extend_from_slice(&chunk);
                false
            }
            Some(Err(e)) => return Err(HeaderError::Io(e.to_string())),
            None => true,
        };

        let decoded = decode_prefix(&raw);
        if let Some(header) = scan_header(&decoded.text, finished)? {
            debug!("Found VCF header ({} lines) after {} chunk(s), {} bytes", header.lines.len(), chunk_count, raw.len());
            return Ok(header);
        }
        // Truncation is reported as a clean short read, so any error left is corruption.
        if let Some(e) = decoded.error {
            return Err(HeaderError::DecompressionError(e));
        }
        if raw.len() > MAX_HEADER_BYTES || decoded.text.len() > MAX_HEADER_BYTES {
            return Err(HeaderError::HeaderTooLarge { limit: MAX_HEADER_BYTES });
        }
        if finished {
            return Err(HeaderError::EofBeforeHeader);
        }
    }
}

/// Streams the head of a remote VCF through `aws s3 cp <uri> -` and stops reading once the header
/// is complete; the transfer process is killed rather than drained.
pub async fn read_remote_header(
    resolver: &LocationResolver,
    location: &RemoteLocation,
) -> Result<VcfHeader, PipelineError> {
    let target = resolver.resolve(location).await?;
    let args = aws::cp_to_stdout_args(&target.uri);
    let command_str = format!("{} {}", AWS_TAG, args.join(" "));

    let mut command = Command::new(AWS_TAG);
    command.args(&args).envs(target.env());
    stream_header(command, &command_str, location).await
}

async fn stream_header(
    mut command: Command,
    command_str: &str,
    location: &RemoteLocation,
) -> Result<VcfHeader, PipelineError> {
    debug!("executing: {}", command_str);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::ToolExecution {
            tool: AWS_TAG.to_string(),
            error: format!("Failed to spawn: {}", e),
        })?;
    let stdout = child.stdout.take().ok_or_else(|| PipelineError::ToolExecution {
        tool: AWS_TAG.to_string(),
        error: "Failed to capture stdout".to_string(),
    })?;

    let header_err = |e: HeaderError| PipelineError::VcfHeader { path: location.to_string(), error: e.to_string() };
    match read_header(chunk_stream(stdout, HEADER_CHUNK_SIZE)).await {
        Ok(header) => {
            let _ = child.start_kill();
            Ok(header)
        }
        Err(HeaderError::EofBeforeHeader) => {
            // stdout is closed; let the transfer finish so its exit status is real
            let output = child.wait_with_output().await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                error!("Failed to stream {}: {}", location, stderr);
                return Err(PipelineError::Transfer {
                    command: command_str.to_string(),
                    code: output.status.code(),
                    stdout: String::new(),
                    stderr,
                });
            }
            Err(header_err(HeaderError::EofBeforeHeader))
        }
        Err(e) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(header_err(e))
        }
    }
}


/// Outcome of comparing observed VCF sample columns to the expected tumour/normal names.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReport {
    pub vcf: String,
    pub expected: Vec<(String, String)>,
    pub observed: Vec<String>,
    pub missing: Vec<(String, String)>,
}

impl SampleReport {
    pub fn new(vcf: &str, expected: &[(&str, &str)], observed: Vec<String>) -> Self {
        let missing = expected
            .iter()
            .filter(|(_, name)| !observed.iter().any(|o| o == name))
            .map(|(role, name)| (role.to_string(), name.to_string()))
            .collect();
        SampleReport {
            vcf: vcf.to_string(),
            expected: expected.iter().map(|(r, n)| (r.to_string(), n.to_string())).collect(),
            observed,
            missing,
        }
    }

    pub fn cardinality_ok(&self) -> bool {
        self.observed.len() == self.expected.len()
    }

    pub fn passed(&self) -> bool {
        self.missing.is_empty() && self.cardinality_ok()
    }

    /// One message per failed check; the missing-name and count checks never mask each other.
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.missing.is_empty() {
            let plurality = if self.missing.len() > 1 { "names" } else { "name" };
            let observed = if self.observed.is_empty() {
                "<none found>".to_string()
            } else {
                self.observed.join("\n\t\t")
            };
            let missing: Vec<String> = self.missing.iter().map(|(r, n)| format!("{}: {}", r, n)).collect();
            errors.push(format!(
                "could not find {} sample {} in '{}', got:\n\tVCF sample names:\n\t\t{}\n\tUnmatched input sample {}:\n\t\t{}",
                self.missing.len(),
                plurality,
                self.vcf,
                observed,
                plurality,
                missing.join("\n\t\t"),
            ));
        }
        if !self.cardinality_ok() {
            let msg = format!(
                "expected {} sample names in '{}', got {}",
                self.expected.len(),
                self.vcf,
                self.observed.len()
            );
            if self.observed.is_empty() {
                errors.push(msg);
            } else {
                errors.push(format!("{}:\n\t{}", msg, self.observed.join("\n\t")));
            }
        }
        errors
    }

    pub fn into_result(self) -> Result<(), PipelineError> {
        if self.passed() {
            for (role, name) in &self.expected {
                info!("found {} sample '{}' in '{}'", role, name, self.vcf);
            }
            return Ok(());
        }
        let errors = self.errors();
        for e in &errors {
            error!("{}", e);
        }
        Err(PipelineError::SampleValidation(errors.join("\n")))
    }
}

pub fn check_format_field(vcf: &str, header: &VcfHeader, field_id: &str) -> Result<(), PipelineError> {
    if header.declares_format(field_id) {
        debug!("'{}' declares FORMAT field {}", vcf, field_id);
        return Ok(());
    }
    let msg = format!("'{}' has no ##FORMAT=<ID={},...> declaration", vcf, field_id);
    error!("{}", msg);
    Err(PipelineError::FormatField(msg))
}


#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use futures::stream;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const HEADER: &str = "##fileformat=VCFv4.2\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
##FORMAT=<ID=AD,Number=R,Type=Integer,Description=\"Allelic depths\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tT1\tN1\n";
    const BODY: &str = "chr1\t100\t.\tA\tT\t50\tPASS\t.\tGT:AD\t0/1:10,5\t0/0:20,0\n";

    fn gzip(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    fn chunked(data: &[u8], size: usize) -> impl Stream<Item = io::Result<Vec<u8>>> + Unpin {
        let chunks: Vec<io::Result<Vec<u8>>> = data.chunks(size.max(1)).map(|c| Ok(c.to_vec())).collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_single_chunk_gzip_header() {
        let data = gzip(&format!("{}{}", HEADER, BODY));
        let header = read_header(chunked(&data, data.len())).await.unwrap();
        assert_eq!(header.lines().len(), 4);
        assert_eq!(header.sample_names(), vec!["T1", "N1"]);
        assert!(header.declares_format("AD"));
        assert!(!header.declares_format("PR"));
    }

    #[tokio::test]
    async fn test_plain_text_header() {
        let data = format!("{}{}", HEADER, BODY).into_bytes();
        let header = read_header(chunked(&data, 7)).await.unwrap();
        assert_eq!(header.sample_names(), vec!["T1", "N1"]);
    }

    #[tokio::test]
    async fn test_header_without_trailing_newline_at_eof() {
        let data = HEADER.trim_end().as_bytes().to_vec();
        let header = read_header(chunked(&data, 16)).await.unwrap();
        assert_eq!(header.sample_names(), vec!["T1", "N1"]);
    }

    #[tokio::test]
    async fn test_eof_before_column_line() {
        let data = gzip("##fileformat=VCFv4.2\n##contig=<ID=chr1>\n");
        assert_eq!(read_header(chunked(&data, 5)).await, Err(HeaderError::EofBeforeHeader));
        assert_eq!(read_header(chunked(&[], 5)).await, Err(HeaderError::EofBeforeHeader));
    }

    #[tokio::test]
    async fn test_truncated_gzip_is_eof_not_decompression_error() {
        let data = gzip(HEADER);
        let truncated = &data[..data.len() / 2];
        assert_eq!(read_header(chunked(truncated, 3)).await, Err(HeaderError::EofBeforeHeader));
    }

    #[tokio::test]
    async fn test_record_before_column_line_is_malformed() {
        let data = gzip(&format!("##fileformat=VCFv4.2\n{}{}", BODY, HEADER));
        match read_header(chunked(&data, 11)).await {
            Err(HeaderError::MalformedHeader { line_number, .. }) => assert_eq!(line_number, 2),
            other => panic!("expected MalformedHeader, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_gzip_stops_reading_at_once() {
        let mut data = gzip(&format!("{}{}", HEADER, BODY));
        // Clobber the deflate block type bits right after the 10 byte gzip header.
        data[10] = 0xff;
        data[11] = 0xff;

        let corrupt: Vec<io::Result<Vec<u8>>> = data.chunks(4).map(|c| Ok(c.to_vec())).collect();
        let trailing: Vec<io::Result<Vec<u8>>> = (0..2000).map(|_| Ok(vec![0u8; 4096])).collect();
        let trailing_read = AtomicUsize::new(0);
        let chunks = stream::iter(corrupt).chain(stream::iter(trailing).inspect(|_| {
            trailing_read.fetch_add(1, Ordering::SeqCst);
        }));

        match read_header(chunks).await {
            Err(HeaderError::DecompressionError(_)) => {}
            other => panic!("expected DecompressionError, got {:?}", other),
        }
        assert_eq!(trailing_read.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_raw_input_is_rejected() {
        // Plain text that never reaches #CHROM.
        let chunk = b"##x\n".repeat(1024 * 1024);
        let chunks: Vec<io::Result<Vec<u8>>> =
            (0..(MAX_HEADER_BYTES / chunk.len() + 1)).map(|_| Ok(chunk.clone())).collect();
        assert_eq!(
            read_header(stream::iter(chunks)).await,
            Err(HeaderError::HeaderTooLarge { limit: MAX_HEADER_BYTES })
        );
    }

    fn fake_aws(dir: &TempDir, script: &str) -> Command {
        let path = dir.path().join("aws.sh");
        std::fs::write(&path, script).unwrap();
        let mut command = Command::new("sh");
        command.arg(path);
        command
    }

    fn location() -> RemoteLocation {
        RemoteLocation::parse("s3://bucket/x.vcf").unwrap()
    }

    #[tokio::test]
    async fn test_clean_exit_without_column_line_is_eof_before_header() {
        let dir = TempDir::new().unwrap();
        let command = fake_aws(&dir, "printf '##fileformat=VCFv4.2\\n##source=test\\n'\nexit 0\n");
        match stream_header(command, "aws s3 cp s3://bucket/x.vcf -", &location()).await {
            Err(PipelineError::VcfHeader { path, error }) => {
                assert_eq!(path, "s3://bucket/x.vcf");
                assert_eq!(error, HeaderError::EofBeforeHeader.to_string());
            }
            other => panic!("expected EofBeforeHeader, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_transfer_reports_exit_and_stderr() {
        let dir = TempDir::new().unwrap();
        let command = fake_aws(&dir, "echo 'An error occurred (404)' >&2\nexit 1\n");
        match stream_header(command, "aws s3 cp s3://bucket/x.vcf -", &location()).await {
            Err(PipelineError::Transfer { code, stderr, .. }) => {
                assert_eq!(code, Some(1));
                assert!(stderr.contains("(404)"));
            }
            other => panic!("expected Transfer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_header_from_process() {
        let dir = TempDir::new().unwrap();
        let body = format!("{}{}", HEADER, BODY).replace('\t', "\\t").replace('\n', "\\n").replace('"', "\\\"");
        let command = fake_aws(&dir, &format!("printf \"{}\"\n", body));
        let header = stream_header(command, "aws s3 cp s3://bucket/x.vcf -", &location()).await.unwrap();
        assert_eq!(header.sample_names(), vec!["T1", "N1"]);
    }

    #[test]
    fn test_report_passes_in_either_order() {
        let expected = [("tumour", "T1"), ("normal", "N1")];
        for observed in [vec!["T1", "N1"], vec!["N1", "T1"]] {
            let report = SampleReport::new("x.vcf.gz", &expected, observed.iter().map(|s| s.to_string()).collect());
            assert!(report.passed());
            assert!(report.errors().is_empty());
        }
    }

    #[test]
    fn test_report_single_column_reports_both_failures() {
        let expected = [("tumour", "T1"), ("normal", "N1")];
        let report = SampleReport::new("x.vcf.gz", &expected, vec!["T1".to_string()]);
        let errors = report.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("normal: N1"));
        assert!(errors[1].starts_with("expected 2 sample names in 'x.vcf.gz', got 1"));
    }

    #[test]
    fn test_report_no_columns_renders_none_found() {
        let expected = [("tumour", "T1"), ("normal", "N1")];
        let report = SampleReport::new("x.vcf.gz", &expected, Vec::new());
        let errors = report.errors();
        assert!(errors[0].contains("<none found>"));
        assert!(errors[0].contains("could not find 2 sample names"));
        assert_eq!(errors[1], "expected 2 sample names in 'x.vcf.gz', got 0");
        assert!(matches!(report.into_result(), Err(PipelineError::SampleValidation(_))));
    }

    #[test]
    fn test_format_field_check() {
        let header = VcfHeader { lines: HEADER.lines().map(|l| l.to_string()).collect() };
        assert!(check_format_field("x.vcf.gz", &header, "AD").is_ok());
        assert!(matches!(
            check_format_field("x.vcf.gz", &header, "PR"),
            Err(PipelineError::FormatField(_))
        ));
    }
}
