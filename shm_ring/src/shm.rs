//! Named shared memory segments backed by `/dev/shm`.

use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;
use std::ptr::NonNull;

/// A mapping of a named POSIX shared memory object.
///
/// The side that created the segment owns it: dropping the owner unmaps
/// the memory and unlinks the name. Other mappings only unmap.
pub struct SharedRegion {
    ptr: NonNull<u8>,
    size: usize,
    name: CString,
    is_owner: bool,
    mapped: bool,
}

unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Creates and maps a new, zero-filled shared memory segment.
    ///
    /// Fails with `AlreadyExists` if the name is taken.
    ///
    /// # Safety
    /// The caller must ensure that `size` is appropriate for the layout it
    /// is going to place in the region.
    pub unsafe fn create<P: AsRef<Path>>(path: P, size: usize) -> io::Result<Self> {
        let name = path_to_cstring(path)?;
        let len = NonZeroUsize::new(size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"))?;

        let fd = shm_open(
            name.as_c_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(io::Error::from)?;

        if let Err(e) = ftruncate(&fd, size as i64) {
            let _ = shm_unlink(name.as_c_str());
            return Err(e.into());
        }

        let ptr = match unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        } {
            Ok(p) => p,
            Err(e) => {
                let _ = shm_unlink(name.as_c_str());
                return Err(e.into());
            }
        };

        // The mapping outlives the descriptor.
        drop(fd);

        Ok(Self {
            ptr: ptr.cast(),
            size,
            name,
            is_owner: true,
            mapped: true,
        })
    }

    /// Maps an existing shared memory segment.
    ///
    /// Fails with `UnexpectedEof` if the segment is still smaller than
    /// `size`, which happens while its creator is sizing it.
    ///
    /// # Safety
    /// The caller must ensure that the segment holds the layout it is going
    /// to read from it.
    pub unsafe fn open<P: AsRef<Path>>(path: P, size: usize) -> io::Result<Self> {
        let name = path_to_cstring(path)?;
        let len = NonZeroUsize::new(size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"))?;

        let fd = shm_open(name.as_c_str(), OFlag::O_RDWR, Mode::empty()).map_err(io::Error::from)?;
        let file = File::from(fd);
        if (file.metadata()?.len() as usize) < size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "shared memory segment is smaller than the requested mapping",
            ));
        }

        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(io::Error::from)?;

        Ok(Self {
            ptr: ptr.cast(),
            size,
            name,
            is_owner: false,
            mapped: true,
        })
    }

    /// Removes a segment name without mapping it.
    pub fn unlink<P: AsRef<Path>>(path: P) -> io::Result<()> {
        let name = path_to_cstring(path)?;
        shm_unlink(name.as_c_str()).map_err(io::Error::from)
    }

    /// Returns a pointer to the start of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the size of the mapping.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the segment name, including the leading `/`.
    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Unmaps the region and leaves the segment in place, even for the owner.
    pub fn unmap(mut self) -> io::Result<()> {
        self.is_owner = false;
        self.release()
    }

    /// Unmaps the region and unlinks the segment name.
    pub fn destroy(mut self) -> io::Result<()> {
        self.is_owner = true;
        self.release()
    }

    fn release(&mut self) -> io::Result<()> {
        if !self.mapped {
            return Ok(());
        }
        self.mapped = false;
        unsafe { munmap(self.ptr.cast(), self.size) }.map_err(io::Error::from)?;
        if self.is_owner {
            shm_unlink(self.name.as_c_str()).map_err(io::Error::from)?;
        }
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(name = self.name(), error = %e, "failed to release shared memory");
        }
    }
}

fn path_to_cstring<P: AsRef<Path>>(path: P) -> io::Result<CString> {
    let path_str = path.as_ref().to_str().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path contains invalid UTF-8")
    })?;

    let name = if path_str.starts_with('/') {
        path_str.to_string()
    } else {
        format!("/{}", path_str)
    };

    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> String {
        format!("/shm_region_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_create_and_open() {
        let name = test_name("open");
        let size = 4096;

        unsafe {
            let owner = SharedRegion::create(&name, size).unwrap();
            assert_eq!(owner.size(), size);
            assert!(owner.is_owner());
            assert_eq!(std::ptr::read_volatile(owner.as_ptr().add(100)), 0u8);

            std::ptr::write_volatile(owner.as_ptr(), 42u8);

            let peer = SharedRegion::open(&name, size).unwrap();
            assert!(!peer.is_owner());
            assert_eq!(std::ptr::read_volatile(peer.as_ptr()), 42u8);

            drop(peer);
            drop(owner);
        }

        let err = unsafe { SharedRegion::open(&name, size) }.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_create_is_exclusive() {
        let name = test_name("excl");
        unsafe {
            let _owner = SharedRegion::create(&name, 64).unwrap();
            let err = SharedRegion::create(&name, 64).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        }
    }

    #[test]
    fn test_open_larger_than_segment() {
        let name = test_name("short");
        unsafe {
            let _owner = SharedRegion::create(&name, 64).unwrap();
            let err = SharedRegion::open(&name, 4096).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        }
    }

    #[test]
    fn test_unmap_keeps_segment() {
        let name = test_name("unmap");
        unsafe {
            let owner = SharedRegion::create(&name, 64).unwrap();
            std::ptr::write_volatile(owner.as_ptr().add(8), 7u8);
            owner.unmap().unwrap();

            let peer = SharedRegion::open(&name, 64).unwrap();
            assert_eq!(std::ptr::read_volatile(peer.as_ptr().add(8)), 7u8);
            peer.destroy().unwrap();
        }
        assert_eq!(
            SharedRegion::unlink(&name).err().unwrap().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_name_gets_leading_slash() {
        let bare = format!("shm_region_bare_{}", std::process::id());
        unsafe {
            let owner = SharedRegion::create(&bare, 64).unwrap();
            assert_eq!(owner.name(), format!("/{}", bare));
        }
    }
}
