//! FUSE adapter.
//!
//! The kernel reserves inode 0, so node `id` is exposed as inode `id + 1`.
//! The adapter keeps no handle table: every call goes back to [`JsonFs`].
//! Entry replies take a lookup reference in the facade and `forget` drops
//! it, so an inode the kernel still knows is never handed to a new node.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fuser::{
    FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};

use jsonfs_core::{FileAttr, FsError, JsonFs, NodeId, NodeKind, ROOT_ID};

const TTL: Duration = Duration::from_secs(1);

fn to_ino(id: NodeId) -> Result<u64, i32> {
    id.checked_add(1).ok_or(libc::EOVERFLOW)
}

fn to_id(ino: u64) -> NodeId {
    ino.saturating_sub(1)
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
    }
}

/// Names the kernel hands us that are not UTF-8 can never match an entry.
fn utf8_name(name: &OsStr) -> Result<&str, FsError> {
    name.to_str()
        .ok_or_else(|| FsError::invalid(format!("non-UTF-8 name {name:?}")))
}

pub struct JsonFsAdapter {
    fs: Arc<JsonFs>,
    /// Parent of every directory the kernel has looked up, for `..`.
    parents: HashMap<NodeId, NodeId>,
    uid: u32,
    gid: u32,
}

impl JsonFsAdapter {
    pub fn new(fs: Arc<JsonFs>) -> Self {
        Self {
            fs,
            parents: HashMap::new(),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn to_file_attr(&self, attr: &FileAttr) -> Result<fuser::FileAttr, i32> {
        Ok(fuser::FileAttr {
            ino: to_ino(attr.id)?,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind: file_type(attr.kind),
            perm: attr.perm as u16,
            nlink: attr.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        })
    }

    fn remember(&mut self, parent: NodeId, attr: &FileAttr) {
        if attr.is_dir() {
            self.parents.insert(attr.id, parent);
        }
    }

    fn reply_entry(&mut self, parent: NodeId, result: Result<FileAttr, FsError>, reply: ReplyEntry) {
        let attr = match result {
            Ok(attr) => attr,
            Err(e) => return reply.error(e.errno()),
        };
        match self.to_file_attr(&attr) {
            Ok(fattr) => {
                self.remember(parent, &attr);
                reply.entry(&TTL, &fattr, 0);
            }
            Err(errno) => {
                self.fs.forget(attr.id, 1);
                reply.error(errno);
            }
        }
    }

    fn reply_attr(&self, result: Result<FileAttr, FsError>, reply: ReplyAttr) {
        match result.map_err(|e| e.errno()).and_then(|a| self.to_file_attr(&a)) {
            Ok(fattr) => reply.attr(&TTL, &fattr),
            Err(errno) => reply.error(errno),
        }
    }
}

impl Filesystem for JsonFsAdapter {
    fn destroy(&mut self) {
        // already logged by the facade
        let _ = self.fs.destroy();
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent = to_id(parent);
        let result = utf8_name(name).and_then(|name| self.fs.lookup(parent, name));
        self.reply_entry(parent, result, reply);
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        let id = to_id(ino);
        self.fs.forget(id, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        self.reply_attr(self.fs.attr(to_id(ino)), reply);
    }

    /// Only size changes are honoured; other attributes are fixed.
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let id = to_id(ino);
        let result = match size {
            Some(size) => self.fs.resize(id, size),
            None => self.fs.attr(id),
        };
        self.reply_attr(result, reply);
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let id = to_id(ino);
        let listing = match self.fs.list(id) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        let parent = self.parents.get(&id).copied().unwrap_or(ROOT_ID);

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (to_ino(parent).unwrap_or(ino), FileType::Directory, "..".to_string()),
        ];
        for e in listing {
            match to_ino(e.id) {
                Ok(e_ino) => entries.push((e_ino, file_type(e.kind), e.name)),
                Err(errno) => return reply.error(errno),
            }
        }

        for (i, (e_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*e_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.fs.attr(to_id(ino)) {
            Ok(attr) if attr.is_dir() => reply.error(libc::EISDIR),
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.read_at(to_id(ino), offset, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.write_at(to_id(ino), offset, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let parent = to_id(parent);
        let attr = match utf8_name(name).and_then(|name| self.fs.create_in(parent, name)) {
            Ok(attr) => attr,
            Err(e) => return reply.error(e.errno()),
        };
        match self.to_file_attr(&attr) {
            Ok(fattr) => reply.created(&TTL, &fattr, 0, 0, 0),
            Err(errno) => {
                self.fs.forget(attr.id, 1);
                reply.error(errno);
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let parent = to_id(parent);
        let result = utf8_name(name).and_then(|name| self.fs.mkdir_in(parent, name));
        self.reply_entry(parent, result, reply);
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match utf8_name(name).and_then(|name| self.fs.unlink_in(to_id(parent), name)) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let parent = to_id(parent);
        match utf8_name(name).and_then(|name| self.fs.rmdir_in(parent, name)) {
            Ok(id) => {
                self.parents.remove(&id);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }
}

/// Mount `fs` at `mountpoint` and serve until Ctrl-C.
///
/// The snapshot is saved when the session is torn down.
pub async fn run(fs: JsonFs, mountpoint: &Path) -> Result<()> {
    let fs = Arc::new(fs);
    let adapter = JsonFsAdapter::new(Arc::clone(&fs));
    let options = [
        MountOption::FSName("jsonfs".into()),
        MountOption::DefaultPermissions,
    ];

    let session = fuser::spawn_mount2(adapter, mountpoint, &options)
        .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;
    tracing::info!(mountpoint = %mountpoint.display(), "mounted; Ctrl-C to unmount");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("unmounting");
    // joining the session unmounts and runs the destroy hook
    session.join();
    Ok(())
}
