//! Address grammar for the two remote stores.
//!
//! Container files are addressed as `namespace/pod/container/<path...>`,
//! objects as `bucket/<key...>`. Both are plain slash-delimited strings
//! without a scheme; the CLI strips `k8s://` / `swift://` before they get
//! here.

use crate::error::TransferError;
use crate::exec::ExecTarget;

/// A parsed container-file address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPath {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    /// Absolute path inside the container. Always starts with `/`.
    pub path: String,
    /// True when the address named only `namespace/pod/container`.
    pub container_only: bool,
}

impl ContainerPath {
    /// Parse `namespace/pod/container[/path...]`.
    ///
    /// Segments after the third are joined with `/` and rooted at `/`.
    /// Empty segments never produce `//`; a trailing slash survives.
    /// Only the segment count is checked here. An empty namespace, pod or
    /// container is left for the exec transport to reject.
    pub fn parse(address: &str) -> Result<Self, TransferError> {
        let segments: Vec<&str> = address.split('/').collect();
        if segments.len() < 3 {
            return Err(TransferError::bad_address(address));
        }

        Ok(Self {
            namespace: segments[0].to_string(),
            pod: segments[1].to_string(),
            container: segments[2].to_string(),
            path: absolute_path(&segments[3..]),
            container_only: segments.len() == 3,
        })
    }

    /// Parse a write destination. When the address names only the
    /// container, the basename of `source` is used as the file name.
    pub fn parse_for_write(address: &str, source: Option<&str>) -> Result<Self, TransferError> {
        let parsed = Self::parse(address)?;
        match source.map(basename) {
            Some(name) if parsed.container_only && !name.is_empty() => {
                Self::parse(&append_basename(address, name))
            }
            _ => Ok(parsed),
        }
    }

    /// The exec session coordinates of this address.
    pub fn target(&self) -> ExecTarget {
        ExecTarget::new(&self.namespace, &self.pod, &self.container)
    }

    /// Directory containing [`Self::path`], as `dirname` would print it.
    pub fn parent_dir(&self) -> String {
        dirname(&self.path)
    }
}

/// A parsed object-store address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub bucket: String,
    /// Object key with empty segments removed. Empty for a bucket-only address.
    pub key: String,
}

impl ObjectPath {
    /// Parse `bucket[/key...]`.
    pub fn parse(address: &str) -> Result<Self, TransferError> {
        let mut segments = address.split('/');
        let bucket = match segments.next() {
            Some(bucket) if !bucket.is_empty() => bucket.to_string(),
            _ => return Err(TransferError::bad_address(address)),
        };
        let key = segments
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self { bucket, key })
    }

    /// Parse a write destination, appending the basename of `source` when
    /// the address names only the bucket.
    pub fn parse_for_write(address: &str, source: Option<&str>) -> Result<Self, TransferError> {
        let mut parsed = Self::parse(address)?;
        if parsed.is_bucket_only() {
            if let Some(name) = source.map(basename).filter(|n| !n.is_empty()) {
                parsed.key = name.to_string();
            }
        }
        Ok(parsed)
    }

    pub fn is_bucket_only(&self) -> bool {
        self.key.is_empty()
    }
}

/// Parse a container-file address.
pub fn parse_container_path(address: &str) -> Result<ContainerPath, TransferError> {
    ContainerPath::parse(address)
}

/// Parse an object-store address.
pub fn parse_object_path(address: &str) -> Result<ObjectPath, TransferError> {
    ObjectPath::parse(address)
}

/// Append `name` to `address` as a new final segment.
pub fn append_basename(address: &str, name: &str) -> String {
    format!("{}/{}", address.trim_end_matches('/'), name)
}

/// Last `/`-delimited component of `path`; empty if `path` ends with `/`.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Everything up to the last `/`, without the trailing slash, or `/`.
pub fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => {
            let dir = path[..idx].trim_end_matches('/');
            if dir.is_empty() {
                "/".to_string()
            } else {
                dir.to_string()
            }
        }
    }
}

fn absolute_path(rest: &[&str]) -> String {
    let joined = rest.join("/");
    let mut path = String::with_capacity(joined.len() + 1);
    path.push('/');
    for ch in joined.chars() {
        if ch == '/' && path.ends_with('/') {
            continue;
        }
        path.push(ch);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_container_address() {
        let p = parse_container_path("ns/pod/c/tmp/a/b").unwrap();
        assert_eq!(p.namespace, "ns");
        assert_eq!(p.pod, "pod");
        assert_eq!(p.container, "c");
        assert_eq!(p.path, "/tmp/a/b");
        assert!(!p.container_only);
        assert_eq!(p.parent_dir(), "/tmp/a");
    }

    #[test]
    fn container_only_address_is_root() {
        let p = parse_container_path("ns/pod/c").unwrap();
        assert_eq!(p.path, "/");
        assert!(p.container_only);
    }

    #[test]
    fn short_container_address_is_rejected() {
        for input in ["ns/pod", "ns", ""] {
            match parse_container_path(input) {
                Err(TransferError::BadAddress { address }) => assert_eq!(address, input),
                other => panic!("expected bad address for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_leading_segments_still_parse() {
        let p = parse_container_path("ns//c/x").unwrap();
        assert_eq!((p.namespace.as_str(), p.pod.as_str(), p.container.as_str()), ("ns", "", "c"));
        assert_eq!(p.path, "/x");

        let p = parse_container_path("/pod/c").unwrap();
        assert_eq!(p.namespace, "");
        assert_eq!(p.pod, "pod");
        assert_eq!(p.path, "/");
        assert!(p.container_only);

        let p = parse_container_path("ns/pod/").unwrap();
        assert_eq!(p.container, "");
        assert_eq!(p.path, "/");
    }

    #[test]
    fn empty_segments_do_not_double_slashes() {
        assert_eq!(parse_container_path("ns/pod/c//x").unwrap().path, "/x");
        assert_eq!(parse_container_path("ns/pod/c/").unwrap().path, "/");
        assert_eq!(
            parse_container_path("ns/pod/c/var/log/").unwrap().path,
            "/var/log/"
        );
        assert_eq!(
            parse_container_path("ns/pod/c/var//log").unwrap().path,
            "/var/log"
        );
    }

    #[test]
    fn every_container_path_is_absolute() {
        for input in ["a/b/c", "a/b/c/d", "a/b/c/", "a/b/c//", "a/b/c/d/e/f/"] {
            let p = parse_container_path(input).unwrap();
            assert!(p.path.starts_with('/'), "{input} -> {}", p.path);
            assert!(!p.path.contains("//"), "{input} -> {}", p.path);
        }
    }

    #[test]
    fn write_into_container_appends_basename() {
        let p = ContainerPath::parse_for_write("ns/pod/c", Some("/x/y/report.tgz")).unwrap();
        assert_eq!(p.path, "/report.tgz");
        assert!(!p.container_only);

        let p = ContainerPath::parse_for_write("ns/pod/c/data", Some("/x/y/report.tgz")).unwrap();
        assert_eq!(p.path, "/data");

        let p = ContainerPath::parse_for_write("ns/pod/c", None).unwrap();
        assert_eq!(p.path, "/");
    }

    #[test]
    fn parses_object_address() {
        let p = parse_object_path("backups/2024/01/db.tgz").unwrap();
        assert_eq!(p.bucket, "backups");
        assert_eq!(p.key, "2024/01/db.tgz");

        let p = parse_object_path("backups").unwrap();
        assert!(p.is_bucket_only());

        let p = parse_object_path("backups//a/").unwrap();
        assert_eq!(p.key, "a");

        assert!(matches!(
            parse_object_path(""),
            Err(TransferError::BadAddress { .. })
        ));
    }

    #[test]
    fn bucket_only_upload_uses_source_basename() {
        let p = ObjectPath::parse_for_write("backups", Some("/x/y/report.tgz")).unwrap();
        assert_eq!(p.bucket, "backups");
        assert_eq!(p.key, "report.tgz");

        let p = ObjectPath::parse_for_write("backups/daily/r.tgz", Some("/x/y/report.tgz")).unwrap();
        assert_eq!(p.key, "daily/r.tgz");
    }

    #[test]
    fn dirname_matches_shell() {
        assert_eq!(dirname("/tmp/a/b"), "/tmp/a");
        assert_eq!(dirname("/b"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(dirname("/var/log/"), "/var/log");
    }

    #[test]
    fn basename_of_paths() {
        assert_eq!(basename("/x/y/report.tgz"), "report.tgz");
        assert_eq!(basename("report.tgz"), "report.tgz");
        assert_eq!(basename("/x/y/"), "");
    }
}
