//! Network namespace handles and scoped switching.
//!
//! Namespace membership is a property of the calling OS thread. Every
//! switch goes through [`NamespaceGuard`], which always re-enters the
//! origin namespace, and runs on a dedicated worker from [`crate::pinned`]
//! so a failed restore never leaks into a thread that is reused.

use netfab_common::{NetfabError, NetfabResult};

/// Resolves and enters network namespaces.
pub trait NamespaceSwitcher: Send + Sync + 'static {
    /// Open handle to a namespace.
    type Handle: Send;

    /// The calling thread's current namespace.
    fn current(&self) -> NetfabResult<Self::Handle>;

    /// The namespace of a process.
    fn of_pid(&self, pid: u32) -> NetfabResult<Self::Handle>;

    /// Move the calling thread into `ns`.
    fn enter(&self, ns: &Self::Handle) -> NetfabResult<()>;
}

/// An entered namespace, restored to the origin on [`restore`] or drop.
///
/// [`restore`]: NamespaceGuard::restore
#[must_use = "dropping the guard immediately restores the origin namespace"]
pub struct NamespaceGuard<'a, S: NamespaceSwitcher> {
    switcher: &'a S,
    origin: Option<S::Handle>,
}

impl<'a, S: NamespaceSwitcher> NamespaceGuard<'a, S> {
    /// Enter `target`, remembering `origin` for restoration.
    ///
    /// If entering fails the thread has not moved and no guard is returned.
    ///
    /// # Errors
    ///
    /// Propagates the switcher's error for `target`.
    pub fn enter(switcher: &'a S, origin: S::Handle, target: &S::Handle) -> NetfabResult<Self> {
        switcher.enter(target)?;
        tracing::debug!("Entered target network namespace");
        Ok(Self {
            switcher,
            origin: Some(origin),
        })
    }

    /// Re-enter the origin namespace and report the outcome.
    ///
    /// # Errors
    ///
    /// Propagates the switcher's error for the origin namespace.
    pub fn restore(mut self) -> NetfabResult<()> {
        match self.origin.take() {
            Some(origin) => {
                self.switcher.enter(&origin)?;
                tracing::debug!("Restored origin network namespace");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<S: NamespaceSwitcher> Drop for NamespaceGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(origin) = self.origin.take() {
            match self.switcher.enter(&origin) {
                Ok(()) => tracing::debug!("Restored origin network namespace"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to restore origin network namespace");
                }
            }
        }
    }
}

/// Run `f` inside `target`, then re-enter `origin` on every exit path.
///
/// An error from `f` wins over a restore error; the restore error is then
/// only logged.
///
/// # Errors
///
/// Fails if entering `target`, `f`, or restoring `origin` fails.
pub fn with_namespace<S, T>(
    switcher: &S,
    origin: S::Handle,
    target: &S::Handle,
    f: impl FnOnce() -> NetfabResult<T>,
) -> NetfabResult<T>
where
    S: NamespaceSwitcher,
{
    let guard = NamespaceGuard::enter(switcher, origin, target)?;
    match f() {
        Ok(value) => {
            guard.restore()?;
            Ok(value)
        }
        Err(e) => {
            drop(guard);
            Err(e)
        }
    }
}

#[cfg(target_os = "linux")]
mod proc {
    use std::fs::File;
    use std::os::fd::{AsFd, OwnedFd};
    use std::path::PathBuf;

    use rustix::thread::{LinkNameSpaceType, move_into_link_name_space};

    use super::{NamespaceSwitcher, NetfabError, NetfabResult};

    /// An open `/proc/.../ns/net` file.
    #[derive(Debug)]
    pub struct NetnsHandle {
        fd: OwnedFd,
        path: PathBuf,
    }

    impl NetnsHandle {
        /// Open a namespace file.
        ///
        /// # Errors
        ///
        /// Missing files map to [`NetfabError::NotFound`], access errors to
        /// [`NetfabError::PermissionDenied`].
        pub fn open(path: impl Into<PathBuf>) -> NetfabResult<Self> {
            let path = path.into();
            let file = File::open(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    NetfabError::not_found(format!("network namespace {}", path.display()))
                }
                std::io::ErrorKind::PermissionDenied => NetfabError::PermissionDenied {
                    operation: format!("open {}", path.display()),
                },
                _ => NetfabError::Io(e),
            })?;
            Ok(Self {
                fd: OwnedFd::from(file),
                path,
            })
        }

        /// Path the handle was opened from.
        #[must_use]
        pub fn path(&self) -> &std::path::Path {
            &self.path
        }

        /// Inode identifying the namespace.
        ///
        /// # Errors
        ///
        /// Fails if the descriptor cannot be stat'ed.
        pub fn inode(&self) -> NetfabResult<u64> {
            let stat = rustix::fs::fstat(&self.fd).map_err(std::io::Error::from)?;
            Ok(stat.st_ino)
        }
    }

    /// [`NamespaceSwitcher`] over `/proc` and `setns(2)`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ProcNamespaces;

    impl NamespaceSwitcher for ProcNamespaces {
        type Handle = NetnsHandle;

        fn current(&self) -> NetfabResult<NetnsHandle> {
            // thread-self, not self: the main thread may live elsewhere.
            NetnsHandle::open("/proc/thread-self/ns/net")
        }

        fn of_pid(&self, pid: u32) -> NetfabResult<NetnsHandle> {
            NetnsHandle::open(format!("/proc/{pid}/ns/net"))
        }

        fn enter(&self, ns: &NetnsHandle) -> NetfabResult<()> {
            tracing::debug!(path = %ns.path().display(), inode = ?ns.inode().ok(), "setns");
            move_into_link_name_space(ns.fd.as_fd(), Some(LinkNameSpaceType::Network)).map_err(
                |errno| {
                    NetfabError::from_os(
                        format!("setns {}", ns.path().display()),
                        &std::io::Error::from(errno),
                    )
                },
            )
        }
    }
}

#[cfg(target_os = "linux")]
pub use proc::{NetnsHandle, ProcNamespaces};

/// Placeholder switcher on platforms without network namespaces.
#[cfg(not(target_os = "linux"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcNamespaces;

#[cfg(not(target_os = "linux"))]
impl NamespaceSwitcher for ProcNamespaces {
    type Handle = ();

    fn current(&self) -> NetfabResult<()> {
        Err(NetfabError::Unsupported {
            feature: "network namespaces".to_string(),
        })
    }

    fn of_pid(&self, _pid: u32) -> NetfabResult<()> {
        self.current()
    }

    fn enter(&self, _ns: &()) -> NetfabResult<()> {
        self.current()
    }
}
