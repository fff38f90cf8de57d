//! Turning an external port scanner's output into port records.  Both the
//! structured XML report and the free text console report are understood.
//! Every entry is folded in through [`merge`] so a later, less detailed
//! entry can never erase a scanned version.

use std::{
    collections::BTreeMap,
    fmt,
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::{
    err::KeelsonErr,
    evidence::{EvidenceSink, EvidenceSubject},
    port::{merge, PortKey, PortPatch, PortRecord, Source},
};

mod structured;
mod text;

/// Name reported for output that didn't come from a file
const STREAM: &str = "<stream>";

/// One accepted scanner entry and the text it was read from
pub(crate) type ScanEntry = (PortKey, PortPatch, String);

/// Parse a port number, rejecting 0 and anything that doesn't fit in a
/// `u16`.
pub(crate) fn parse_port_number(number: &str) -> Result<u16, String> {
    match number.parse::<u16>() {
        Ok(0) => Err("port 0 is not a usable port".to_string()),
        Ok(number) => Ok(number),
        Err(e) => Err(format!("bad port number {number:?}: {e}")),
    }
}

/// Does this look like a structured report regardless of its file name?
fn looks_structured(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<?xml") || head.starts_with("<!DOCTYPE nmaprun") || head.starts_with("<nmaprun")
}

/// The port records imported for one target host.
#[derive(Clone)]
pub struct ScanImport {
    target: IpAddr,
    ports: BTreeMap<PortKey, PortRecord>,
    evidence: Option<Arc<dyn EvidenceSink>>,
}

impl fmt::Debug for ScanImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanImport")
            .field("target", &self.target)
            .field("ports", &self.ports)
            .field("evidence", &self.evidence.is_some())
            .finish()
    }
}

impl ScanImport {
    /// An empty import for `target`
    pub fn new(target: IpAddr) -> Self {
        Self {
            target,
            ports: BTreeMap::new(),
            evidence: None,
        }
    }

    /// Report every entry parsed from here on to `evidence`, naming the
    /// file it came from and the text it was read from.
    pub fn with_evidence(mut self, evidence: Arc<dyn EvidenceSink>) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// The host this import is about
    pub fn target(&self) -> IpAddr {
        self.target
    }

    /// Number of distinct ports imported
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Nothing was imported
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// The record imported for `key`
    pub fn get(&self, key: PortKey) -> Option<&PortRecord> {
        self.ports.get(&key)
    }

    /// Fold one scanner entry into the import.
    pub fn insert(&mut self, key: PortKey, patch: &PortPatch) {
        let record = self
            .ports
            .entry(key)
            .or_insert_with(|| PortRecord::new(key));
        *record = merge(record, patch, Source::ScanImport);
    }

    fn insert_entries(&mut self, source: &str, entries: Vec<ScanEntry>) {
        for (key, patch, raw) in entries {
            if let Some(evidence) = &self.evidence {
                let subject = EvidenceSubject::Port {
                    ip: self.target,
                    key,
                };
                evidence.create_evidence(&subject, source, &raw);
            }
            self.insert(key, &patch);
        }
    }

    /// Parse a structured (XML) report.  A report that can't be parsed adds
    /// nothing and the error is handed back.
    pub fn parse_structured(&mut self, bytes: &[u8]) -> Result<(), quick_xml::DeError> {
        self.parse_structured_from(STREAM, bytes)
    }

    fn parse_structured_from(
        &mut self,
        source: &str,
        bytes: &[u8],
    ) -> Result<(), quick_xml::DeError> {
        let entries = structured::parse(bytes, self.target)?;
        self.insert_entries(source, entries);
        Ok(())
    }

    /// Parse a free text report.
    pub fn parse_text(&mut self, report: &str) {
        let entries = text::parse(report, self.target);
        self.insert_entries(STREAM, entries);
    }

    /// Parse a report of unknown format.  Anything we can't make sense of is
    /// logged and skipped.
    pub fn parse_bytes(&mut self, bytes: &[u8]) {
        self.parse_named(None, bytes)
    }

    fn parse_named(&mut self, path: Option<&Path>, bytes: &[u8]) {
        let name = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| STREAM.to_string());
        let xml_extension = path
            .and_then(Path::extension)
            .map(|extension| extension.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if xml_extension || looks_structured(bytes) {
            if let Err(e) = self.parse_structured_from(&name, bytes) {
                warn!("Skipping {}, it isn't a readable XML report: {}", name, e);
            }
        } else {
            match std::str::from_utf8(bytes) {
                Ok(report) => {
                    let entries = text::parse(report, self.target);
                    self.insert_entries(&name, entries);
                }
                Err(e) => warn!("Skipping {}, it isn't text: {}", name, e),
            }
        }
    }

    /// The imported records ordered by protocol then port number
    pub fn into_records(self) -> Vec<PortRecord> {
        self.ports.into_values().collect()
    }
}

/// The contents of a scan output directory, read once and parsed for as
/// many targets as needed.
#[derive(Clone, Debug, Default)]
pub struct ScanOutput {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl ScanOutput {
    /// Read every regular file in `dir`, in name order.  Only a directory we
    /// can't list is an error; a file we can't read is logged and left out.
    #[instrument(level = "debug")]
    pub async fn read_dir(dir: &Path) -> Result<Self, KeelsonErr> {
        let dir_error = |source| KeelsonErr::ScanOutputDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = fs::read_dir(dir).await.map_err(dir_error)?;
        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(dir_error)? {
            let path = entry.path();
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => paths.push(path),
                Ok(_) => debug!("Skipping {}, it isn't a file", path.display()),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match fs::read(&path).await {
                Ok(bytes) => files.push((path, bytes)),
                Err(e) => warn!("Skipping unreadable scan output {}: {}", path.display(), e),
            }
        }
        debug!("Read {} scan output files from {}", files.len(), dir.display());
        Ok(Self { files })
    }

    /// Number of files read
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// No files were read
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Parse every file into `import`, in name order.  A file that can't be
    /// parsed contributes nothing.
    pub fn parse_into(&self, import: &mut ScanImport) {
        for (path, bytes) in &self.files {
            import.parse_named(Some(path), bytes);
        }
        debug!("Imported {} ports for {}", import.len(), import.target());
    }
}

/// Load every file in `dir` as scanner output about `target`.  See
/// [`ScanOutput::read_dir`] for what counts as an error.
pub async fn load_dir(dir: &Path, target: IpAddr) -> Result<ScanImport, KeelsonErr> {
    let output = ScanOutput::read_dir(dir).await?;
    let mut import = ScanImport::new(target);
    output.parse_into(&mut import);
    Ok(import)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;
    use crate::{
        evidence::MemoryEvidenceSink,
        port::{PortState, Protocol},
    };

    const STRUCTURED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun>
<host>
<address addr="10.0.0.5" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh" product="OpenSSH" version="8.9p1"/></port>
<port protocol="udp" portid="53"><state state="open"/><service name="domain"/></port>
</ports>
</host>
</nmaprun>
"#;

    fn target() -> IpAddr {
        "10.0.0.5".parse().unwrap()
    }

    /// A fresh, empty directory under the system temp dir.
    fn scratch_dir() -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "keelson-scan-output-{}-{}-{}",
            std::process::id(),
            nanos,
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn unversioned_text_does_not_downgrade_structured() {
        let mut import = ScanImport::new(target());
        import.parse_structured(STRUCTURED.as_bytes()).unwrap();
        import.parse_text("22/tcp open ssh\n");
        let record = import.get(PortKey::tcp(22)).unwrap();
        assert_eq!(record.version.as_deref(), Some("OpenSSH 8.9p1"));
    }

    #[test]
    fn versioned_text_updates_structured() {
        let mut import = ScanImport::new(target());
        import.parse_structured(STRUCTURED.as_bytes()).unwrap();
        import.parse_text("22/tcp open ssh OpenSSH 9.6\n");
        let record = import.get(PortKey::tcp(22)).unwrap();
        assert_eq!(record.version.as_deref(), Some("OpenSSH 9.6"));
    }

    #[test]
    fn disjoint_imports_union() {
        let mut import = ScanImport::new(target());
        import.parse_structured(STRUCTURED.as_bytes()).unwrap();
        import.parse_text("80/tcp open http\n8443/tcp closed https-alt\n");
        let keys: Vec<PortKey> = import.into_records().iter().map(PortRecord::key).collect();
        assert_eq!(
            keys,
            vec![
                PortKey::tcp(22),
                PortKey::tcp(80),
                PortKey::tcp(8443),
                PortKey::udp(53)
            ]
        );
    }

    #[test]
    fn merge_order_is_irrelevant_for_disjoint_keys() {
        let mut forward = ScanImport::new(target());
        forward.parse_structured(STRUCTURED.as_bytes()).unwrap();
        forward.parse_text("80/tcp open http\n");
        let mut backward = ScanImport::new(target());
        backward.parse_text("80/tcp open http\n");
        backward.parse_structured(STRUCTURED.as_bytes()).unwrap();
        assert_eq!(forward.into_records(), backward.into_records());
    }

    #[test]
    fn byte_streams_are_sniffed() {
        let mut import = ScanImport::new(target());
        import.parse_bytes(STRUCTURED.as_bytes());
        import.parse_bytes(b"80/tcp open http\n");
        import.parse_bytes(&[0xff, 0xfe, 0x00, 0x81]);
        assert_eq!(import.len(), 3);
        assert_eq!(import.get(PortKey::udp(53)).unwrap().protocol, Protocol::Udp);
    }

    #[test]
    fn port_numbers() {
        assert_eq!(parse_port_number("443"), Ok(443));
        assert!(parse_port_number("0").is_err());
        assert!(parse_port_number("65536").is_err());
        assert!(parse_port_number("http").is_err());
    }

    #[tokio::test]
    async fn load_dir_keeps_partial_results() {
        let dir = scratch_dir();
        std::fs::write(dir.join("a_syn_scan.xml"), STRUCTURED).unwrap();
        std::fs::write(dir.join("b_broken.xml"), "<nmaprun><host>").unwrap();
        std::fs::write(
            dir.join("c_console.txt"),
            "Nmap scan report for 10.0.0.5\n22/tcp open ssh\n80/tcp  open  http  Apache httpd 2.4\n",
        )
        .unwrap();
        std::fs::create_dir(dir.join("nested")).unwrap();

        let import = load_dir(&dir, target()).await.unwrap();
        assert_eq!(import.len(), 3);
        let ssh = import.get(PortKey::tcp(22)).unwrap();
        assert_eq!(ssh.version.as_deref(), Some("OpenSSH 8.9p1"));
        let http = import.get(PortKey::tcp(80)).unwrap();
        assert_eq!(http.state, PortState::Open);
        assert_eq!(http.service.as_deref(), Some("http"));
        assert_eq!(http.version.as_deref(), Some("Apache httpd 2.4"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn accepted_entries_are_reported() {
        let sink = Arc::new(MemoryEvidenceSink::default());
        let mut import = ScanImport::new(target()).with_evidence(sink.clone());
        import.parse_text("PORT   STATE SERVICE\n22/tcp open ssh\n0/tcp open http\n80/tcp  open  http  \n");

        let evidence = sink.evidence();
        assert_eq!(evidence.len(), 2);
        assert_eq!(
            evidence[0].subject,
            EvidenceSubject::Port {
                ip: target(),
                key: PortKey::tcp(22)
            }
        );
        assert_eq!(evidence[0].payload, STREAM);
        assert_eq!(evidence[0].data, "22/tcp open ssh");
        assert_eq!(evidence[1].data, "80/tcp  open  http");
    }

    #[tokio::test]
    async fn files_are_named_in_evidence() {
        let dir = scratch_dir();
        let path = dir.join("syn_scan.xml");
        std::fs::write(&path, STRUCTURED).unwrap();
        let sink = Arc::new(MemoryEvidenceSink::default());

        let output = ScanOutput::read_dir(&dir).await.unwrap();
        let mut import = ScanImport::new(target()).with_evidence(sink.clone());
        output.parse_into(&mut import);

        let evidence = sink.evidence();
        assert_eq!(evidence.len(), 2);
        assert!(evidence
            .iter()
            .all(|evidence| evidence.payload == path.display().to_string()));
        assert!(evidence[1].data.contains(r#"portid="53""#));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn output_is_read_once_for_every_target() {
        let dir = scratch_dir();
        std::fs::write(
            dir.join("console.txt"),
            "Nmap scan report for 10.0.0.5\n22/tcp open ssh\nNmap scan report for 10.0.0.6\n3306/tcp open mysql\n",
        )
        .unwrap();
        let output = ScanOutput::read_dir(&dir).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(output.len(), 1);

        let mut first = ScanImport::new(target());
        output.parse_into(&mut first);
        let mut second = ScanImport::new("10.0.0.6".parse().unwrap());
        output.parse_into(&mut second);
        assert_eq!(
            first.into_records().iter().map(PortRecord::key).collect::<Vec<_>>(),
            vec![PortKey::tcp(22)]
        );
        assert_eq!(
            second.into_records().iter().map(PortRecord::key).collect::<Vec<_>>(),
            vec![PortKey::tcp(3306)]
        );
    }

    #[tokio::test]
    async fn missing_dir_is_an_error() {
        let dir = scratch_dir().join("does-not-exist");
        assert!(matches!(
            load_dir(&dir, target()).await,
            Err(KeelsonErr::ScanOutputDir { .. })
        ));
    }
}
