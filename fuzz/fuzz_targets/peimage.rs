#![no_main]

use libfuzzer_sys::fuzz_target;
use dotlens::PeImage;

fuzz_target!(|data: &[u8]| {
    if let Ok(image) = PeImage::from_mem(data.to_vec()) {
        for (_, slot) in image.directories().iter() {
            let _ = slot.virtual_address();
        }

        if let Some(cor20) = image.cor20() {
            let _ = cor20.entry_point();
            let _ = cor20.vtable_fixups();
        }

        let _ = image.decode_tables_header();
    }
});
