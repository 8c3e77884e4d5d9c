//! Builders for crafted metadata and PE images shared by the unit tests.

use std::collections::BTreeMap;

use crate::metadata::tables::{HeapIndexWidths, TableId, TableInfo};

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Builds a metadata root (`BSJB`) followed by the data of its streams.
pub struct MetadataBuilder {
    version: String,
    streams: Vec<(String, Vec<u8>)>,
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self {
            version: "v4.0.30319".to_string(),
            streams: Vec::new(),
        }
    }
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn stream(mut self, name: &str, data: &[u8]) -> Self {
        self.streams.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let version_len = pad4(self.version.len() + 1);
        let headers_len: usize = self
            .streams
            .iter()
            .map(|(name, _)| 8 + pad4(name.len() + 1))
            .sum();

        let mut root = Vec::new();
        root.extend_from_slice(b"BSJB");
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&(version_len as u32).to_le_bytes());
        root.extend_from_slice(self.version.as_bytes());
        root.resize(16 + version_len, 0);
        root.extend_from_slice(&0u16.to_le_bytes());
        root.extend_from_slice(&(self.streams.len() as u16).to_le_bytes());

        let mut data_offset = root.len() + headers_len;
        for (name, data) in &self.streams {
            root.extend_from_slice(&(data_offset as u32).to_le_bytes());
            root.extend_from_slice(&(data.len() as u32).to_le_bytes());

            let name_start = root.len();
            root.extend_from_slice(name.as_bytes());
            root.resize(name_start + pad4(name.len() + 1), 0);

            data_offset += pad4(data.len());
        }

        for (_, data) in &self.streams {
            let start = root.len();
            root.extend_from_slice(data);
            root.resize(start + pad4(data.len()), 0);
        }

        root
    }
}

/// Builds a tables stream: header, row counts and zero-filled table rows.
pub struct TablesStreamBuilder {
    reserved1: u32,
    major_version: u8,
    minor_version: u8,
    heap_sizes: u8,
    reserved2: u8,
    sorted: u64,
    tables: BTreeMap<u8, u32>,
    extra_data: Option<u32>,
    table_data: bool,
}

impl Default for TablesStreamBuilder {
    fn default() -> Self {
        Self {
            reserved1: 0,
            major_version: 2,
            minor_version: 0,
            heap_sizes: 0,
            reserved2: 1,
            sorted: 0,
            tables: BTreeMap::new(),
            extra_data: None,
            table_data: true,
        }
    }
}

impl TablesStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserved1(mut self, value: u32) -> Self {
        self.reserved1 = value;
        self
    }

    pub fn reserved2(mut self, value: u8) -> Self {
        self.reserved2 = value;
        self
    }

    pub fn version(mut self, major: u8, minor: u8) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn heap_sizes(mut self, value: u8) -> Self {
        self.heap_sizes = value;
        self
    }

    pub fn sorted(mut self, value: u64) -> Self {
        self.sorted = value;
        self
    }

    /// Marks `table` as present with `rows` rows.
    pub fn table(mut self, table: u8, rows: u32) -> Self {
        self.tables.insert(table, rows);
        self
    }

    /// Sets the `EXTRA_DATA` heap flag and appends `value` after the row counts.
    pub fn extra_data(mut self, value: u32) -> Self {
        self.extra_data = Some(value);
        self
    }

    /// Stops after the row counts (and the extra data word).
    pub fn without_table_data(mut self) -> Self {
        self.table_data = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let heap_sizes = if self.extra_data.is_some() {
            self.heap_sizes | 0x40
        } else {
            self.heap_sizes
        };
        let valid = self
            .tables
            .keys()
            .fold(0u64, |valid, table| valid | (1u64 << table));

        let mut stream = Vec::new();
        stream.extend_from_slice(&self.reserved1.to_le_bytes());
        stream.push(self.major_version);
        stream.push(self.minor_version);
        stream.push(heap_sizes);
        stream.push(self.reserved2);
        stream.extend_from_slice(&valid.to_le_bytes());
        stream.extend_from_slice(&self.sorted.to_le_bytes());
        for rows in self.tables.values() {
            stream.extend_from_slice(&rows.to_le_bytes());
        }

        if let Some(extra_data) = self.extra_data {
            stream.extend_from_slice(&extra_data.to_le_bytes());
        }

        if self.table_data {
            let info = TableInfo::new(&self.tables, HeapIndexWidths::from_flags(heap_sizes));
            let data_len: usize = self
                .tables
                .iter()
                .filter_map(|(&table, &rows)| {
                    TableId::from_repr(table).map(|id| rows as usize * info.row_size(id) as usize)
                })
                .sum();
            stream.resize(stream.len() + data_len, 0);
        }

        stream
    }
}

/// RVA of the single `.text` section of a [`PeBuilder`] image
pub const TEXT_RVA: u32 = 0x2000;
/// File offset of the single `.text` section of a [`PeBuilder`] image
pub const TEXT_OFFSET: u32 = 0x200;
/// Size of the CLI header written by [`PeBuilder`]
pub const CLI_HEADER_LEN: u32 = 0x48;

/// Builds a minimal PE image with one `.text` section holding a CLI header and metadata.
///
/// The CLI header sits at the start of the section, the metadata root right after it.
pub struct PeBuilder {
    pe32_plus: bool,
    directory_count: u32,
    clr: bool,
    metadata: Vec<u8>,
    directories: Vec<(usize, u32, u32)>,
}

impl Default for PeBuilder {
    fn default() -> Self {
        Self {
            pe32_plus: false,
            directory_count: 16,
            clr: true,
            metadata: MetadataBuilder::new()
                .stream("#~", &TablesStreamBuilder::new().table(0x00, 1).build())
                .build(),
            directories: Vec::new(),
        }
    }
}

impl PeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pe32_plus(mut self) -> Self {
        self.pe32_plus = true;
        self
    }

    pub fn directory_count(mut self, count: u32) -> Self {
        self.directory_count = count;
        self
    }

    /// Leaves the CLI header directory slot empty.
    pub fn without_clr(mut self) -> Self {
        self.clr = false;
        self
    }

    pub fn metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Fills data directory slot `index`.
    pub fn directory(mut self, index: usize, rva: u32, size: u32) -> Self {
        self.directories.push((index, rva, size));
        self
    }

    /// File offset of the data directory array.
    pub fn directory_offset(&self) -> u64 {
        if self.pe32_plus {
            0x108
        } else {
            0xF8
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let optional_header_size: u16 = if self.pe32_plus { 0xF0 } else { 0xE0 };
        let text_len = CLI_HEADER_LEN as usize + self.metadata.len();
        let raw_size = (text_len + 0x1FF) & !0x1FF;

        let mut image = vec![0u8; TEXT_OFFSET as usize + raw_size];
        let mut put = |offset: usize, bytes: &[u8]| {
            image[offset..offset + bytes.len()].copy_from_slice(bytes);
        };

        // DOS header
        put(0x00, b"MZ");
        put(0x3C, &0x80u32.to_le_bytes());

        // PE signature and COFF header
        put(0x80, b"PE\0\0");
        let machine: u16 = if self.pe32_plus { 0x8664 } else { 0x14C };
        put(0x84, &machine.to_le_bytes());
        put(0x86, &1u16.to_le_bytes());
        put(0x94, &optional_header_size.to_le_bytes());
        let characteristics: u16 = if self.pe32_plus { 0x2022 } else { 0x2102 };
        put(0x96, &characteristics.to_le_bytes());

        // optional header
        let optional = 0x98;
        if self.pe32_plus {
            put(optional, &0x20Bu16.to_le_bytes());
            put(optional + 24, &0x1_8000_0000u64.to_le_bytes());
        } else {
            put(optional, &0x10Bu16.to_le_bytes());
            put(optional + 28, &0x40_0000u32.to_le_bytes());
        }
        put(optional + 32, &0x1000u32.to_le_bytes());
        put(optional + 36, &0x200u32.to_le_bytes());
        put(optional + 40, &4u16.to_le_bytes());
        put(optional + 48, &4u16.to_le_bytes());
        put(optional + 56, &0x4000u32.to_le_bytes());
        put(optional + 60, &0x200u32.to_le_bytes());
        put(optional + 68, &3u16.to_le_bytes());
        let count_offset = if self.pe32_plus { 108 } else { 92 };
        put(optional + count_offset, &self.directory_count.to_le_bytes());

        if self.clr {
            let slot = self.directory_offset() as usize + 14 * 8;
            put(slot, &TEXT_RVA.to_le_bytes());
            put(slot + 4, &CLI_HEADER_LEN.to_le_bytes());
        }
        for &(index, rva, size) in &self.directories {
            let slot = self.directory_offset() as usize + index * 8;
            put(slot, &rva.to_le_bytes());
            put(slot + 4, &size.to_le_bytes());
        }

        // section table
        let section = optional + optional_header_size as usize;
        put(section, b".text\0\0\0");
        put(section + 8, &(text_len as u32).to_le_bytes());
        put(section + 12, &TEXT_RVA.to_le_bytes());
        put(section + 16, &(raw_size as u32).to_le_bytes());
        put(section + 20, &TEXT_OFFSET.to_le_bytes());
        put(section + 36, &0x6000_0020u32.to_le_bytes());

        // CLI header
        let cli = TEXT_OFFSET as usize;
        put(cli, &CLI_HEADER_LEN.to_le_bytes());
        put(cli + 4, &2u16.to_le_bytes());
        put(cli + 6, &5u16.to_le_bytes());
        put(cli + 8, &(TEXT_RVA + CLI_HEADER_LEN).to_le_bytes());
        put(cli + 12, &(self.metadata.len() as u32).to_le_bytes());
        put(cli + 16, &1u32.to_le_bytes());
        put(cli + 20, &0x0600_0001u32.to_le_bytes());

        put(cli + CLI_HEADER_LEN as usize, &self.metadata);

        image
    }
}
