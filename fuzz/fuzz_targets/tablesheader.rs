#![no_main]

use libfuzzer_sys::fuzz_target;
use dotlens::{
    metadata::{config::DecoderConfig, diagnostics::Diagnostics, streams::MetadataTablesHeader},
    RawBuffer, Structure,
};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Ok(buffer) = RawBuffer::from_mem(data.to_vec()) else {
        return;
    };

    if let Ok(view) = MetadataTablesHeader::resolve(&buffer, 0) {
        if let Ok(header) = view.decode() {
            for table in header.present_tables() {
                let _ = header.table_range(table);
            }
        }

        let _ = view.decode_with(&DecoderConfig::strict(), Arc::new(Diagnostics::new()));
    }
});
