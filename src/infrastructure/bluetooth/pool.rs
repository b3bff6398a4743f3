//! Report Buffer Pool
//!
//! Recycles input report buffers so the polling loop does not allocate on
//! every tick. Shared between sessions; each size class has its own lock.

use parking_lot::Mutex;
use tracing::trace;

use crate::infrastructure::bluetooth::protocol::{NFC_REPORT_LENGTH, STANDARD_REPORT_LENGTH};
use crate::infrastructure::bluetooth::report::InputReport;

/// Buffers kept per class before released ones are simply dropped
const MAX_RETAINED: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// 50-byte standard / subcommand reply frames
    Standard,
    /// 363-byte NFC/IR mode frames
    Nfc,
}

impl SizeClass {
    pub fn len(&self) -> usize {
        match self {
            Self::Standard => STANDARD_REPORT_LENGTH,
            Self::Nfc => NFC_REPORT_LENGTH,
        }
    }

    fn for_capacity(len: usize) -> Option<Self> {
        match len {
            STANDARD_REPORT_LENGTH => Some(Self::Standard),
            NFC_REPORT_LENGTH => Some(Self::Nfc),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct ReportPool {
    standard: Mutex<Vec<Vec<u8>>>,
    nfc: Mutex<Vec<Vec<u8>>>,
}

impl ReportPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn class_pool(&self, class: SizeClass) -> &Mutex<Vec<Vec<u8>>> {
        match class {
            SizeClass::Standard => &self.standard,
            SizeClass::Nfc => &self.nfc,
        }
    }

    /// Get a buffer holding the canonical template for `class`
    pub fn acquire(&self, class: SizeClass) -> InputReport {
        match self.class_pool(class).lock().pop() {
            Some(buffer) => InputReport::from_buffer(buffer),
            None => InputReport::with_len(class.len()),
        }
    }

    pub fn acquire_standard(&self) -> InputReport {
        self.acquire(SizeClass::Standard)
    }

    /// Hand a buffer back; buffers of an unknown size are dropped
    pub fn release(&self, report: InputReport) {
        let Some(class) = SizeClass::for_capacity(report.len()) else {
            trace!("Dropping report buffer of {} bytes", report.len());
            return;
        };

        let mut pool = self.class_pool(class).lock();
        if pool.len() < MAX_RETAINED {
            pool.push(report.into_inner());
        }
    }

    /// Number of idle buffers held for `class`
    pub fn idle(&self, class: SizeClass) -> usize {
        self.class_pool(class).lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reacquired_buffer_is_reset() {
        let pool = ReportPool::new();
        let mut report = pool.acquire_standard();
        report.fill(0, 50, 0xEE);
        pool.release(report);
        assert_eq!(pool.idle(SizeClass::Standard), 1);

        let report = pool.acquire_standard();
        assert_eq!(pool.idle(SizeClass::Standard), 0);
        assert_eq!(report.len(), 50);
        assert_eq!(report.byte(0), 0xA1);
        assert!(report.bytes(1..50).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_classes_are_kept_apart() {
        let pool = ReportPool::new();
        let mut nfc = pool.acquire(SizeClass::Nfc);
        assert_eq!(nfc.len(), 363);
        nfc.fill(1, 362, 0x11);
        pool.release(nfc);

        assert_eq!(pool.idle(SizeClass::Standard), 0);
        assert_eq!(pool.idle(SizeClass::Nfc), 1);
        assert_eq!(pool.acquire_standard().len(), 50);

        let nfc = pool.acquire(SizeClass::Nfc);
        assert_eq!(nfc.byte(0), 0xA1);
        assert!(nfc.bytes(1..363).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_foreign_sizes_dropped() {
        let pool = ReportPool::new();
        pool.release(InputReport::with_len(64));
        assert_eq!(pool.idle(SizeClass::Standard), 0);
        assert_eq!(pool.idle(SizeClass::Nfc), 0);
    }

    #[test]
    fn test_concurrent_use() {
        let pool = Arc::new(ReportPool::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut report = pool.acquire_standard();
                        assert_eq!(report.byte(1), 0);
                        report.fill(1, 49, i as u8 + 1);
                        pool.release(report);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.idle(SizeClass::Standard) <= 4);
    }
}
