//! Stdio pipes between the supervisor and the core
//!
//! Both pipes are created close-on-exec, so no end leaks into the core by
//! accident. The core only receives the ends explicitly installed as its
//! stdin/stdout/stderr, which the spawn duplicates onto fds 0-2.

use crate::error::SupervisorError;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Read and write ends of one unidirectional pipe
#[derive(Debug)]
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    /// Create a pipe whose ends are both close-on-exec
    pub fn new() -> io::Result<Self> {
        let mut fds: [RawFd; 2] = [-1, -1];
        create_cloexec_pipe(&mut fds)?;

        // SAFETY: the pipe call succeeded, so both descriptors are open and
        // exclusively ours.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn create_cloexec_pipe(fds: &mut [RawFd; 2]) -> io::Result<()> {
    // SAFETY: fds points to two writable c_ints
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn create_cloexec_pipe(fds: &mut [RawFd; 2]) -> io::Result<()> {
    // SAFETY: fds points to two writable c_ints
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    for fd in fds.iter() {
        // SAFETY: fd was just returned by pipe
        if unsafe { libc::fcntl(*fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            let err = io::Error::last_os_error();
            // SAFETY: both descriptors are ours and not yet wrapped
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }
    Ok(())
}

/// The ends handed to the core
#[derive(Debug)]
pub struct ChildEnds {
    /// Becomes the core's stdin
    pub stdin: OwnedFd,
    /// Becomes the core's stdout and stderr
    pub output: OwnedFd,
}

/// The ends the supervisor keeps
#[derive(Debug)]
pub struct ParentEnds {
    /// Configuration payload is written here
    pub stdin: OwnedFd,
    /// Merged core output is read from here
    pub output: OwnedFd,
}

/// Stdin pipe plus merged stdout/stderr pipe for one core run
#[derive(Debug)]
pub struct StdioPipes {
    stdin: Pipe,
    output: Pipe,
}

impl StdioPipes {
    /// Create both pipes
    ///
    /// If the second pipe cannot be created the first is dropped, closing
    /// both of its ends before the error is returned.
    pub fn create() -> Result<Self, SupervisorError> {
        Self::create_with(Pipe::new)
    }

    fn create_with(
        mut make_pipe: impl FnMut() -> io::Result<Pipe>,
    ) -> Result<Self, SupervisorError> {
        let stdin = make_pipe().map_err(|e| SupervisorError::PipeCreationFailed {
            reason: format!("stdin pipe: {}", e),
        })?;
        let output = make_pipe().map_err(|e| SupervisorError::PipeCreationFailed {
            reason: format!("stdout pipe: {}", e),
        })?;

        Ok(Self { stdin, output })
    }

    /// Separate the core's ends from the supervisor's ends
    pub fn split(self) -> (ChildEnds, ParentEnds) {
        (
            ChildEnds {
                stdin: self.stdin.read,
                output: self.output.write,
            },
            ParentEnds {
                stdin: self.stdin.write,
                output: self.output.read,
            },
        )
    }
}
