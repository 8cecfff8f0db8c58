//! OTA arming: write an empty marker file then reboot, so a separate
//! bootloader stage can consult it on the next start.
//!
//! Flash-image download/erase/write is out of scope here: this gateway's
//! OTA trigger is a zero-length marker file consulted by a separate
//! bootloader stage, not an in-firmware image flasher. The marker
//! persistence sits behind a small `FileSystem` trait; the concrete
//! binary-only implementation reads/writes a single sentinel byte
//! directly via `embedded-storage`'s `NorFlash`/`ReadNorFlash` traits
//! rather than a key-value flash log, since one marker bit needs no log
//! structure.

/// Arms OTA by writing (or clearing) a named, zero-length marker file.
pub trait FileSystem {
    type Error;

    async fn write_marker(&mut self, name: &str) -> Result<(), Self::Error>;
    async fn marker_exists(&mut self, name: &str) -> Result<bool, Self::Error>;
    async fn clear_marker(&mut self, name: &str) -> Result<(), Self::Error>;
}

pub const OTA_MARKER: &str = ".USOTA";

#[derive(Debug)]
pub enum Error<E> {
    FileSystem(E),
}

/// Arms the pending-OTA marker so the bootloader picks up a firmware
/// update on the next boot. Rebooting is the caller's responsibility,
/// enacted by the supervisor via the `HwReset` adapter.
pub async fn arm_update<F: FileSystem>(fs: &mut F) -> Result<(), Error<F::Error>> {
    fs.write_marker(OTA_MARKER).await.map_err(Error::FileSystem)
}

/// Consulted once at boot (by the bootloader stage, out of scope here);
/// exposed so the firmware itself can clear a stale marker after a
/// successful update.
pub async fn clear_pending<F: FileSystem>(fs: &mut F) -> Result<(), Error<F::Error>> {
    fs.clear_marker(OTA_MARKER).await.map_err(Error::FileSystem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct StubFs {
        markers: RefCell<heapless::Vec<heapless::String<16>, 4>>,
    }

    impl FileSystem for StubFs {
        type Error = ();

        async fn write_marker(&mut self, name: &str) -> Result<(), ()> {
            let mut s = heapless::String::new();
            let _ = core::fmt::Write::write_str(&mut s, name);
            self.markers.borrow_mut().push(s).ok();
            Ok(())
        }

        async fn marker_exists(&mut self, name: &str) -> Result<bool, ()> {
            Ok(self.markers.borrow().iter().any(|m| m.as_str() == name))
        }

        async fn clear_marker(&mut self, name: &str) -> Result<(), ()> {
            self.markers.borrow_mut().retain(|m| m.as_str() != name);
            Ok(())
        }
    }

    fn block_on<F: core::future::Future>(fut: F) -> F::Output {
        use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = core::pin::pin!(fut);
        loop {
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
        }
    }

    #[test]
    fn arming_writes_the_marker() {
        let mut fs = StubFs { markers: RefCell::new(heapless::Vec::new()) };
        block_on(arm_update(&mut fs)).unwrap();
        assert!(block_on(fs.marker_exists(OTA_MARKER)).unwrap());
    }

    #[test]
    fn clearing_removes_the_marker() {
        let mut fs = StubFs { markers: RefCell::new(heapless::Vec::new()) };
        block_on(arm_update(&mut fs)).unwrap();
        block_on(clear_pending(&mut fs)).unwrap();
        assert!(!block_on(fs.marker_exists(OTA_MARKER)).unwrap());
    }
}
