//! Kernel communication for the enforcement surface.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use tracing::{debug, trace};

use crate::error::FirewallError;
use crate::firewall::schema::{parse_listing, Batch, Family, NfObject, SetElem};

/// Handle to the kernel packet filter.
///
/// Every [`commit`](NftBackend::commit) is one kernel transaction: it is either
/// applied whole or not at all. The handle is not meant for concurrent use;
/// callers serialize access.
pub trait NftBackend: Send {
    fn commit(&mut self, batch: &Batch) -> Result<(), FirewallError>;

    /// Every object of a table, or `None` when the table does not exist.
    fn list_table(
        &mut self,
        family: Family,
        table: &str,
    ) -> Result<Option<Vec<NfObject>>, FirewallError>;

    /// Live elements of one set.
    fn list_set(
        &mut self,
        family: Family,
        table: &str,
        set: &str,
    ) -> Result<Vec<SetElem>, FirewallError>;
}

impl<B: NftBackend + ?Sized> NftBackend for &mut B {
    fn commit(&mut self, batch: &Batch) -> Result<(), FirewallError> {
        (**self).commit(batch)
    }

    fn list_table(
        &mut self,
        family: Family,
        table: &str,
    ) -> Result<Option<Vec<NfObject>>, FirewallError> {
        (**self).list_table(family, table)
    }

    fn list_set(
        &mut self,
        family: Family,
        table: &str,
        set: &str,
    ) -> Result<Vec<SetElem>, FirewallError> {
        (**self).list_set(family, table, set)
    }
}

/// Drives the `nft` executable in JSON mode.
#[derive(Debug, Clone)]
pub struct NftCommand {
    binary: PathBuf,
}

impl NftCommand {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, FirewallError> {
        trace!("Running {} {}", self.binary.display(), args.join(" "));
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(payload)?;
        }
        Ok(child.wait_with_output()?)
    }
}

impl Default for NftCommand {
    fn default() -> Self {
        Self::new("nft")
    }
}

impl NftBackend for NftCommand {
    fn commit(&mut self, batch: &Batch) -> Result<(), FirewallError> {
        let payload = serde_json::to_vec(batch)?;
        let output = self.run(&["-j", "-f", "-"], Some(&payload))?;
        if !output.status.success() {
            return Err(FirewallError::Commit(stderr_of(&output)));
        }
        debug!("Committed {} nftables commands", batch.commands().len());
        Ok(())
    }

    fn list_table(
        &mut self,
        family: Family,
        table: &str,
    ) -> Result<Option<Vec<NfObject>>, FirewallError> {
        let output = self.run(&["-j", "list", "table", family.as_str(), table], None)?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_missing_object(&stderr) {
                return Ok(None);
            }
            return Err(FirewallError::Query(stderr));
        }
        Ok(Some(parse_listing(&String::from_utf8_lossy(&output.stdout))?))
    }

    fn list_set(
        &mut self,
        family: Family,
        table: &str,
        set: &str,
    ) -> Result<Vec<SetElem>, FirewallError> {
        let output = self.run(&["-j", "list", "set", family.as_str(), table, set], None)?;
        if !output.status.success() {
            return Err(FirewallError::Query(stderr_of(&output)));
        }
        let objects = parse_listing(&String::from_utf8_lossy(&output.stdout))?;
        Ok(objects
            .into_iter()
            .filter_map(|object| match object {
                NfObject::Set(found) if found.name == set => Some(found.elem),
                _ => None,
            })
            .flatten()
            .collect())
    }
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("nft exited with {}", output.status)
    } else {
        stderr
    }
}

/// `nft` reports a missing table/set as ENOENT.
fn is_missing_object(stderr: &str) -> bool {
    stderr.contains("No such file or directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_an_io_error() {
        let mut backend = NftCommand::new("/nonexistent/bin/nft");
        let err = backend.commit(&Batch::new()).unwrap_err();
        assert!(matches!(err, FirewallError::Io(_)));
        let err = backend.list_table(Family::Inet, "lw").unwrap_err();
        assert!(matches!(err, FirewallError::Io(_)));
    }

    #[test]
    fn enoent_means_missing() {
        assert!(is_missing_object(
            "Error: No such file or directory\nlist table inet lw\n                 ^^"
        ));
        assert!(!is_missing_object("Error: Operation not permitted"));
    }

    #[cfg(unix)]
    mod with_fake_binary {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use serde_json::Value;
        use tempfile::TempDir;

        use crate::firewall::schema::{Element, Table};

        const TABLE_LISTING: &str = r#"{"nftables": [{"metainfo": {"json_schema_version": 1}}, {"table": {"family": "inet", "name": "lw", "handle": 7}}, {"set": {"family": "inet", "name": "blocked_v4", "table": "lw", "type": "ipv4_addr", "handle": 1, "flags": ["timeout"]}}]}"#;
        const SET_LISTING: &str = r#"{"nftables": [{"metainfo": {"json_schema_version": 1}}, {"set": {"family": "inet", "name": "blocked_v4", "table": "lw", "type": "ipv4_addr", "flags": ["timeout"], "elem": [{"elem": {"val": "192.0.2.1", "timeout": 600, "expires": 42}}, "192.0.2.9"]}}, {"set": {"family": "inet", "name": "other", "table": "lw", "type": "ipv4_addr", "elem": ["198.51.100.1"]}}]}"#;

        /// Answers like `nft -j`: commits land in `batch.json`, table `lw`
        /// exists, any other table is ENOENT.
        fn nft_script() -> String {
            format!(
                r#"#!/bin/sh
case "$2" in
  -f) cat > "$(dirname "$0")/batch.json"; exit 0 ;;
  list)
    if [ "$3" = "set" ]; then echo '{SET_LISTING}'; exit 0; fi
    if [ "$5" = "lw" ]; then echo '{TABLE_LISTING}'; exit 0; fi
    echo "Error: No such file or directory" >&2
    exit 1 ;;
esac
exit 2
"#
            )
        }

        const DENIED_SCRIPT: &str = "#!/bin/sh\necho 'Error: Operation not permitted' >&2\nexit 1\n";

        fn install(dir: &TempDir, script: &str) -> NftCommand {
            let path = dir.path().join("nft");
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            NftCommand::new(path)
        }

        fn captured(dir: &Path) -> Value {
            serde_json::from_str(&fs::read_to_string(dir.join("batch.json")).unwrap()).unwrap()
        }

        #[test]
        fn commit_pipes_the_batch_document() {
            let dir = tempfile::tempdir().unwrap();
            let mut nft = install(&dir, &nft_script());

            let mut batch = Batch::new();
            batch
                .add(NfObject::Table(Table::new(Family::Inet, "lw")))
                .add(NfObject::Element(Element::new(
                    Family::Inet,
                    "lw",
                    "blocked_v4",
                    vec![SetElem::with_timeout("192.0.2.1", 300)],
                )));
            nft.commit(&batch).unwrap();
            assert_eq!(captured(dir.path()), serde_json::to_value(&batch).unwrap());
        }

        #[test]
        fn list_table_reads_objects_and_maps_enoent_to_none() {
            let dir = tempfile::tempdir().unwrap();
            let mut nft = install(&dir, &nft_script());

            let objects = nft.list_table(Family::Inet, "lw").unwrap().unwrap();
            assert_eq!(objects.len(), 2);
            assert!(matches!(&objects[1], NfObject::Set(set) if set.name == "blocked_v4"));

            assert!(nft.list_table(Family::Inet, "absent").unwrap().is_none());
        }

        #[test]
        fn list_set_keeps_only_the_requested_set() {
            let dir = tempfile::tempdir().unwrap();
            let mut nft = install(&dir, &nft_script());

            let elems = nft.list_set(Family::Inet, "lw", "blocked_v4").unwrap();
            let values: Vec<&str> = elems.iter().map(SetElem::value).collect();
            assert_eq!(values, vec!["192.0.2.1", "192.0.2.9"]);
        }

        #[test]
        fn nonzero_exit_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let mut nft = install(&dir, DENIED_SCRIPT);

            let err = nft.commit(&Batch::new()).unwrap_err();
            assert!(matches!(err, FirewallError::Commit(ref msg) if msg.contains("Operation not permitted")));
            let err = nft.list_table(Family::Inet, "lw").unwrap_err();
            assert!(matches!(err, FirewallError::Query(_)));
            let err = nft.list_set(Family::Inet, "lw", "blocked_v4").unwrap_err();
            assert!(matches!(err, FirewallError::Query(_)));
        }
    }
}
