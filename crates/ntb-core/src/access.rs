use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{domain::UserId, errors::Error, Result};

// ============== Persistence ==============

/// Line-oriented persistence for the allow-list.
pub trait AllowListStore: Send + Sync {
    fn load(&self) -> Result<HashSet<UserId>>;
    fn save(&self, members: &HashSet<UserId>) -> Result<()>;
}

/// One user id per line. Blank lines and `#` comments are ignored.
#[derive(Clone, Debug)]
pub struct FileAllowListStore {
    path: PathBuf,
}

impl FileAllowListStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AllowListStore for FileAllowListStore {
    fn load(&self) -> Result<HashSet<UserId>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(parse_allow_list(&contents, &self.path))
    }

    fn save(&self, members: &HashSet<UserId>) -> Result<()> {
        let mut ids: Vec<i64> = members.iter().map(|u| u.0).collect();
        ids.sort_unstable();
        let mut body = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        body.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so readers never see a half-written list.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::AllowList {
            path: self.path.clone(),
            reason: format!("rename failed: {e}"),
        })
    }
}

fn parse_allow_list(contents: &str, path: &Path) -> HashSet<UserId> {
    let mut out = HashSet::new();
    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<i64>() {
            Ok(id) => {
                out.insert(UserId(id));
            }
            Err(_) => tracing::warn!(
                path = %path.display(),
                line = lineno + 1,
                "skipping malformed allow-list entry"
            ),
        }
    }
    out
}

// ============== Gate ==============

/// Process-wide authorization check.
///
/// Membership lives in one `RwLock<HashSet<_>>`: reads are cheap and concurrent, and a
/// write is visible to every read that starts after it returns. A mutation builds the
/// next set, persists it and only then swaps it in, so readers never wait on disk I/O
/// and a failed write leaves the list as it was.
pub struct AccessGate {
    admin: UserId,
    members: RwLock<HashSet<UserId>>,
    store: Box<dyn AllowListStore>,
    /// Serializes mutations so two writers never persist diverging sets.
    writer: Mutex<()>,
}

impl AccessGate {
    /// Load the list from `store`. The administrator is always a member.
    pub fn load(admin: UserId, store: Box<dyn AllowListStore>) -> Result<Self> {
        let mut members = store.load()?;
        if members.insert(admin) {
            store.save(&members)?;
        }
        tracing::info!(members = members.len(), "allow-list loaded");

        Ok(Self {
            admin,
            members: RwLock::new(members),
            store,
            writer: Mutex::new(()),
        })
    }

    pub fn admin(&self) -> UserId {
        self.admin
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        user_id == self.admin
    }

    pub fn is_allowed(&self, user_id: UserId) -> bool {
        self.read().contains(&user_id)
    }

    /// Returns `false` if the user was already a member.
    pub fn add(&self, user_id: UserId) -> Result<bool> {
        let added = self.update(|members| members.insert(user_id))?;
        if added {
            tracing::info!(user_id = user_id.0, "user added to allow-list");
        }
        Ok(added)
    }

    /// Returns `false` if the user was not a member. The administrator cannot be removed.
    pub fn remove(&self, user_id: UserId) -> Result<bool> {
        if self.is_admin(user_id) {
            return Err(Error::AdminProtected(user_id));
        }

        let removed = self.update(|members| members.remove(&user_id))?;
        if removed {
            tracing::info!(user_id = user_id.0, "user removed from allow-list");
        }
        Ok(removed)
    }

    /// Apply `change` to a copy of the list, persist it, then publish it.
    fn update(&self, change: impl FnOnce(&mut HashSet<UserId>) -> bool) -> Result<bool> {
        let _writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());

        let mut next = self.read().clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.store.save(&next)?;
        *self.write() = next;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn members(&self) -> Vec<UserId> {
        let mut out: Vec<UserId> = self.read().iter().copied().collect();
        out.sort();
        out
    }

    fn read(&self) -> RwLockReadGuard<'_, HashSet<UserId>> {
        self.members.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<UserId>> {
        self.members.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use super::*;

    fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}/allowed_users.txt"))
    }

    struct BrokenStore;

    impl AllowListStore for BrokenStore {
        fn load(&self) -> Result<HashSet<UserId>> {
            Ok([UserId(1)].into_iter().collect())
        }

        fn save(&self, _members: &HashSet<UserId>) -> Result<()> {
            Err(Error::External("disk full".to_string()))
        }
    }

    /// Blocks inside `save` until released, reporting when it got there.
    struct GatedStore {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl AllowListStore for GatedStore {
        fn load(&self) -> Result<HashSet<UserId>> {
            Ok([UserId(1)].into_iter().collect())
        }

        fn save(&self, _members: &HashSet<UserId>) -> Result<()> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(())
        }
    }

    #[test]
    fn missing_file_seeds_admin_and_persists() {
        let path = tmp("ntb-acl-seed");
        let gate = AccessGate::load(UserId(1), Box::new(FileAllowListStore::new(&path))).unwrap();

        assert!(gate.is_allowed(UserId(1)));
        assert!(!gate.is_allowed(UserId(2)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n");
    }

    #[test]
    fn parses_lines_and_skips_garbage() {
        let path = tmp("ntb-acl-parse");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "# users\n42\n\n  7 \nnot-a-number\n").unwrap();

        let gate = AccessGate::load(UserId(1), Box::new(FileAllowListStore::new(&path))).unwrap();
        assert_eq!(gate.members(), vec![UserId(1), UserId(7), UserId(42)]);
    }

    #[test]
    fn add_and_remove_are_persisted_and_immediately_visible() {
        let path = tmp("ntb-acl-mutate");
        let gate = AccessGate::load(UserId(1), Box::new(FileAllowListStore::new(&path))).unwrap();

        assert!(gate.add(UserId(5)).unwrap());
        assert!(!gate.add(UserId(5)).unwrap());
        assert!(gate.is_allowed(UserId(5)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n5\n");

        assert!(gate.remove(UserId(5)).unwrap());
        assert!(!gate.is_allowed(UserId(5)));
        assert!(!gate.remove(UserId(5)).unwrap());

        let reloaded =
            AccessGate::load(UserId(1), Box::new(FileAllowListStore::new(&path))).unwrap();
        assert!(!reloaded.is_allowed(UserId(5)));
    }

    #[test]
    fn admin_cannot_be_removed() {
        let path = tmp("ntb-acl-admin");
        let gate = AccessGate::load(UserId(1), Box::new(FileAllowListStore::new(&path))).unwrap();
        assert!(matches!(
            gate.remove(UserId(1)),
            Err(Error::AdminProtected(UserId(1)))
        ));
        assert!(gate.is_allowed(UserId(1)));
    }

    #[test]
    fn failed_persist_rolls_back() {
        let gate = AccessGate::load(UserId(1), Box::new(BrokenStore)).unwrap();
        assert!(gate.add(UserId(9)).is_err());
        assert!(!gate.is_allowed(UserId(9)));
    }

    #[test]
    fn removal_is_visible_across_threads() {
        let path = tmp("ntb-acl-threads");
        let gate =
            Arc::new(AccessGate::load(UserId(1), Box::new(FileAllowListStore::new(&path))).unwrap());
        gate.add(UserId(3)).unwrap();

        let g = gate.clone();
        std::thread::spawn(move || g.remove(UserId(3)).unwrap())
            .join()
            .unwrap();
        assert!(!gate.is_allowed(UserId(3)));
    }

    #[test]
    fn readers_are_not_blocked_while_a_change_is_persisted() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(
            AccessGate::load(
                UserId(1),
                Box::new(GatedStore {
                    entered: Mutex::new(entered_tx),
                    release: Mutex::new(release_rx),
                }),
            )
            .unwrap(),
        );

        let g = gate.clone();
        let writer = std::thread::spawn(move || g.add(UserId(5)).unwrap());
        entered_rx.recv().unwrap();

        // The save is in progress: reads answer from the current list.
        assert!(gate.is_allowed(UserId(1)));
        assert!(!gate.is_allowed(UserId(5)));

        release_tx.send(()).unwrap();
        assert!(writer.join().unwrap());
        assert!(gate.is_allowed(UserId(5)));
    }
}
