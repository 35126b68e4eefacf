//! Raw `.eh_frame`/`.debug_frame` bytes for a loaded module, handed to
//! `qperf-unwind` so it can build its own `gimli` unwind context. This
//! crate only locates and caches the section bytes; evaluating CFI rows
//! is the unwinder's job.

use std::sync::Arc;

use object::{Object, ObjectSection};

#[derive(Debug, Clone, Default)]
pub struct CfiSections {
    pub eh_frame: Option<Arc<[u8]>>,
    pub debug_frame: Option<Arc<[u8]>>,
}

impl CfiSections {
    pub fn load(object_file: &object::File) -> Self {
        let eh_frame = object_file
            .section_by_name(".eh_frame")
            .and_then(|s| s.uncompressed_data().ok())
            .map(|cow| Arc::from(cow.into_owned().into_boxed_slice()));
        let debug_frame = object_file
            .section_by_name(".debug_frame")
            .and_then(|s| s.uncompressed_data().ok())
            .map(|cow| Arc::from(cow.into_owned().into_boxed_slice()));
        CfiSections {
            eh_frame,
            debug_frame,
        }
    }
}
