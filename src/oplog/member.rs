//! Replica-set member directories.
//!
//! A member directory holds a JSON descriptor (name, role, users) and the
//! member's operation log. [`ReplicaMember`] is the store side: it owns the
//! single writer lock and appends operations. Tail clients only read the
//! descriptor and the log.

use super::log::OplogFile;
use crate::error::{Result, TailError};
use crate::types::{Document, Position, Value};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILE: &str = "member.json";
pub const LOG_FILE: &str = "oplog.bin";
pub const LOCK_FILE: &str = "member.lock";

/// Role a member currently plays in the replica set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Primary,
    Secondary,
    /// Not serving reads.
    Down,
}

/// The `member.json` descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: String,
    pub role: MemberRole,
    /// username -> sha256 hex of the password.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

impl MemberInfo {
    pub fn new(name: impl Into<String>, role: MemberRole) -> Self {
        Self {
            name: name.into(),
            role,
            users: BTreeMap::new(),
        }
    }

    /// Read the descriptor of the member at `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let bytes = fs::read(dir.join(DESCRIPTOR_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write atomically (temp file + rename) so readers never see a torn descriptor.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{DESCRIPTOR_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, dir.join(DESCRIPTOR_FILE))?;
        Ok(())
    }

    /// Members without users accept any (or no) credentials.
    pub fn requires_auth(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn verify_password(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|stored| *stored == password_digest(password))
    }
}

fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Store-side handle to one member directory.
pub struct ReplicaMember {
    dir: PathBuf,
    info: Mutex<MemberInfo>,
    log: OplogFile,
    /// Held for the lifetime of the writer.
    _lock_file: File,
}

impl ReplicaMember {
    /// Create a member directory (or take over an existing one with a new descriptor).
    pub fn create(dir: impl AsRef<Path>, name: impl Into<String>, role: MemberRole) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock_file = Self::acquire_lock(&dir)?;
        let info = MemberInfo::new(name, role);
        info.store(&dir)?;
        let log = OplogFile::open(dir.join(LOG_FILE))?;

        tracing::info!(member = %info.name, role = ?info.role, dir = %dir.display(), "created replica member");

        Ok(Self {
            dir,
            info: Mutex::new(info),
            log,
            _lock_file: lock_file,
        })
    }

    /// Open an existing member directory for writing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let lock_file = Self::acquire_lock(&dir)?;
        let info = MemberInfo::load(&dir)?;
        let log = OplogFile::open(dir.join(LOG_FILE))?;

        Ok(Self {
            dir,
            info: Mutex::new(info),
            log,
            _lock_file: lock_file,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn info(&self) -> MemberInfo {
        self.info.lock().clone()
    }

    pub fn log(&self) -> &OplogFile {
        &self.log
    }

    /// Append a raw document. No field is required; the log stores whatever it is given.
    pub fn append(&self, doc: &Document) -> Result<u64> {
        self.log.append(doc)
    }

    /// Append an operation in the usual `{ts, v, op, ns, o}` shape.
    pub fn append_op(&self, ts: Position, ns: &str, op: &str, o: Document) -> Result<u64> {
        let doc = Document::new()
            .with("ts", ts)
            .with("v", Value::Int(2))
            .with("op", op)
            .with("ns", ns)
            .with("o", o);
        self.log.append(&doc)
    }

    /// Close the stream for good; tail clients report it as exhausted.
    pub fn seal(&self) -> Result<()> {
        self.log.seal()?;
        tracing::info!(member = %self.info.lock().name, "sealed operation log");
        Ok(())
    }

    /// Change the member's role (step-down, promotion, outage).
    pub fn set_role(&self, role: MemberRole) -> Result<()> {
        let mut info = self.info.lock();
        info.role = role;
        info.store(&self.dir)?;
        tracing::info!(member = %info.name, role = ?role, "member role changed");
        Ok(())
    }

    pub fn add_user(&self, user: impl Into<String>, password: &str) -> Result<()> {
        let mut info = self.info.lock();
        info.users.insert(user.into(), password_digest(password));
        info.store(&self.dir)
    }

    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = File::create(dir.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| TailError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for ReplicaMember {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.log.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a");
        {
            let member = ReplicaMember::create(&path, "a", MemberRole::Primary).unwrap();
            member
                .append_op(Position(100), "app.users", "i", Document::new().with("_id", 1i64))
                .unwrap();
        }

        let info = MemberInfo::load(&path).unwrap();
        assert_eq!(info.name, "a");
        assert_eq!(info.role, MemberRole::Primary);

        let member = ReplicaMember::open(&path).unwrap();
        assert!(member.log().size() > 0);
    }

    #[test]
    fn test_single_writer() {
        let dir = TempDir::new().unwrap();
        let _member = ReplicaMember::create(dir.path(), "a", MemberRole::Primary).unwrap();
        assert!(matches!(ReplicaMember::open(dir.path()), Err(TailError::Locked)));
    }

    #[test]
    fn test_set_role_is_visible_to_readers() {
        let dir = TempDir::new().unwrap();
        let member = ReplicaMember::create(dir.path(), "a", MemberRole::Primary).unwrap();
        member.set_role(MemberRole::Secondary).unwrap();
        assert_eq!(MemberInfo::load(dir.path()).unwrap().role, MemberRole::Secondary);
        assert!(!dir.path().join("member.json.tmp").exists());
    }

    #[test]
    fn test_users() {
        let dir = TempDir::new().unwrap();
        let member = ReplicaMember::create(dir.path(), "a", MemberRole::Primary).unwrap();
        assert!(!member.info().requires_auth());

        member.add_user("reader", "s3cret").unwrap();
        let info = MemberInfo::load(dir.path()).unwrap();
        assert!(info.requires_auth());
        assert!(info.verify_password("reader", "s3cret"));
        assert!(!info.verify_password("reader", "wrong"));
        assert!(!info.verify_password("writer", "s3cret"));
        assert!(!info.users["reader"].contains("s3cret"));
    }

    #[test]
    fn test_descriptor_format() {
        let info: MemberInfo =
            serde_json::from_str(r#"{"name": "b", "role": "secondary"}"#).unwrap();
        assert_eq!(info.role, MemberRole::Secondary);
        assert!(info.users.is_empty());
    }
}
