//! FlatBuffer encoder for the table subset read by [`super::Table`].
//!
//! Objects are laid out front to back: a table's vtable precedes it and
//! everything it references is written after it, so every relative offset
//! is positive. Used to produce descriptors, packs and model files for
//! fixtures and tooling.

use byteorder::{ByteOrder, LittleEndian};

enum Field {
    U8(u8),
    I8(i8),
    U16(u16),
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    String(String),
    Bytes(Vec<u8>),
    Table(TableBuilder),
    VecU64(Vec<u64>),
    VecU32(Vec<u32>),
    VecString(Vec<String>),
    VecTable(Vec<TableBuilder>),
}

impl Field {
    /// Inline size and alignment inside the table.
    fn inline_size(&self) -> usize {
        match self {
            Field::U8(_) | Field::I8(_) => 1,
            Field::U16(_) => 2,
            Field::U64(_) => 8,
            _ => 4,
        }
    }
}

/// A table under construction. Fields are addressed by schema index.
#[derive(Default)]
pub struct TableBuilder {
    fields: Vec<(u16, Field)>,
}

macro_rules! add_field {
    ($($name:ident($ty:ty) => $variant:ident),* $(,)?) => {
        $(
            pub fn $name(&mut self, index: u16, value: $ty) -> &mut Self {
                self.set(index, Field::$variant(value.into()))
            }
        )*
    };
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, index: u16, field: Field) -> &mut Self {
        self.fields.retain(|(i, _)| *i != index);
        self.fields.push((index, field));
        self
    }

    add_field! {
        add_u8(u8) => U8,
        add_i8(i8) => I8,
        add_u16(u16) => U16,
        add_u32(u32) => U32,
        add_i32(i32) => I32,
        add_u64(u64) => U64,
        add_f32(f32) => F32,
        add_string(&str) => String,
        add_bytes(&[u8]) => Bytes,
        add_vector_u64(&[u64]) => VecU64,
        add_vector_u32(&[u32]) => VecU32,
    }

    pub fn add_table(&mut self, index: u16, table: TableBuilder) -> &mut Self {
        self.set(index, Field::Table(table))
    }

    pub fn add_vector_strings<S: AsRef<str>>(&mut self, index: u16, values: &[S]) -> &mut Self {
        let values = values.iter().map(|s| s.as_ref().to_string()).collect();
        self.set(index, Field::VecString(values))
    }

    pub fn add_vector_tables(&mut self, index: u16, tables: Vec<TableBuilder>) -> &mut Self {
        self.set(index, Field::VecTable(tables))
    }
}

/// Serializes a [`TableBuilder`] tree into a FlatBuffer.
pub struct FlatBufferBuilder {
    buf: Vec<u8>,
}

impl FlatBufferBuilder {
    /// Encode `root` as a complete buffer.
    pub fn finish(root: &TableBuilder) -> Vec<u8> {
        let mut builder = Self { buf: vec![0; 4] };
        let root_pos = builder.write_table(root);
        LittleEndian::write_u32(&mut builder.buf[0..4], root_pos as u32);
        builder.buf
    }

    fn align(&mut self, alignment: usize) {
        while self.buf.len() % alignment != 0 {
            self.buf.push(0);
        }
    }

    fn patch_offset(&mut self, at: usize, target: usize) {
        LittleEndian::write_u32(&mut self.buf[at..at + 4], (target - at) as u32);
    }

    fn write_table(&mut self, table: &TableBuilder) -> usize {
        let slots = table
            .fields
            .iter()
            .map(|(i, _)| *i as usize + 1)
            .max()
            .unwrap_or(0);

        // Lay out inline fields after the 4-byte soffset, widest first.
        let mut order: Vec<&(u16, Field)> = table.fields.iter().collect();
        order.sort_by_key(|(_, f)| std::cmp::Reverse(f.inline_size()));
        let mut voffsets = vec![0u16; slots];
        let mut cursor = 4usize;
        for (index, field) in &order {
            let size = field.inline_size();
            cursor = cursor.next_multiple_of(size);
            voffsets[*index as usize] = cursor as u16;
            cursor += size;
        }
        let table_len = cursor;

        // vtable, then the table aligned to 8 so u64 fields are aligned.
        let vtable_len = 4 + 2 * slots;
        self.align(2);
        let mut vtable_pos = self.buf.len();
        while (vtable_pos + vtable_len) % 8 != 0 {
            self.buf.push(0);
            vtable_pos += 1;
        }
        self.buf.extend_from_slice(&(vtable_len as u16).to_le_bytes());
        self.buf.extend_from_slice(&(table_len as u16).to_le_bytes());
        for voffset in &voffsets {
            self.buf.extend_from_slice(&voffset.to_le_bytes());
        }

        let table_pos = self.buf.len();
        self.buf.resize(table_pos + table_len, 0);
        LittleEndian::write_i32(
            &mut self.buf[table_pos..],
            (table_pos - vtable_pos) as i32,
        );

        let mut pending = Vec::new();
        for (index, field) in &table.fields {
            let at = table_pos + voffsets[*index as usize] as usize;
            let slot = &mut self.buf[at..];
            match field {
                Field::U8(v) => slot[0] = *v,
                Field::I8(v) => slot[0] = *v as u8,
                Field::U16(v) => LittleEndian::write_u16(slot, *v),
                Field::U32(v) => LittleEndian::write_u32(slot, *v),
                Field::I32(v) => LittleEndian::write_i32(slot, *v),
                Field::U64(v) => LittleEndian::write_u64(slot, *v),
                Field::F32(v) => LittleEndian::write_f32(slot, *v),
                reference => pending.push((at, reference)),
            }
        }

        for (at, field) in pending {
            if let Some(target) = self.write_object(field) {
                self.patch_offset(at, target);
            }
        }

        table_pos
    }

    /// Write a referenced object and return its position. Scalars have none.
    fn write_object(&mut self, field: &Field) -> Option<usize> {
        let pos = match field {
            Field::String(s) => self.write_string(s),
            Field::Bytes(bytes) => {
                let pos = self.write_len(bytes.len(), 1);
                self.buf.extend_from_slice(bytes);
                pos
            }
            Field::Table(table) => self.write_table(table),
            Field::VecU64(values) => {
                let pos = self.write_len(values.len(), 8);
                for v in values {
                    self.buf.extend_from_slice(&v.to_le_bytes());
                }
                pos
            }
            Field::VecU32(values) => {
                let pos = self.write_len(values.len(), 4);
                for v in values {
                    self.buf.extend_from_slice(&v.to_le_bytes());
                }
                pos
            }
            Field::VecString(values) => {
                let pos = self.write_offset_slots(values.len());
                for (i, value) in values.iter().enumerate() {
                    let target = self.write_string(value);
                    self.patch_offset(pos + 4 + 4 * i, target);
                }
                pos
            }
            Field::VecTable(tables) => {
                let pos = self.write_offset_slots(tables.len());
                for (i, table) in tables.iter().enumerate() {
                    let target = self.write_table(table);
                    self.patch_offset(pos + 4 + 4 * i, target);
                }
                pos
            }
            _ => return None,
        };
        Some(pos)
    }

    /// Write a vector length so the elements that follow are aligned.
    fn write_len(&mut self, len: usize, element_align: usize) -> usize {
        self.align(4);
        while (self.buf.len() + 4) % element_align != 0 {
            self.buf.push(0);
        }
        let pos = self.buf.len();
        self.buf.extend_from_slice(&(len as u32).to_le_bytes());
        pos
    }

    /// Write a vector of zeroed offset slots, patched once the targets exist.
    fn write_offset_slots(&mut self, count: usize) -> usize {
        let pos = self.write_len(count, 4);
        self.buf.resize(pos + 4 + 4 * count, 0);
        pos
    }

    fn write_string(&mut self, s: &str) -> usize {
        let pos = self.write_len(s.len(), 1);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        pos
    }
}
