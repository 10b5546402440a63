use std::sync::Arc;

use crate::fs::open_file::OpenFile;
use crate::fs::sector::ByteRw;

/// Magic word opening every executable image.
pub const EXEC_MAGIC: u32 = 0x584b_4546;

/// Image header: the magic plus three segment descriptors.
pub const EXEC_HEADER_SIZE: usize = 4 + 3 * 12;

/// One segment of an executable image.
#[derive(Clone, Copy, Debug, Default)]
pub struct Segment {
    pub virtual_addr: usize,
    pub in_file_addr: usize,
    pub size: usize,
}

impl Segment {
    fn parse(rw: &ByteRw, at: usize) -> Self {
        Self {
            virtual_addr: rw.read_u32(at) as usize,
            in_file_addr: rw.read_u32(at + 4) as usize,
            size: rw.read_u32(at + 8) as usize,
        }
    }
}

/// A user executable: code, initialized data and an uninitialized region,
/// laid out contiguously in the virtual address space starting at zero.
/// The backing file stays open for demand loading.
pub struct Executable {
    file: Arc<OpenFile>,
    code: Segment,
    init_data: Segment,
    uninit_data: Segment,
}

impl Executable {
    pub fn new(file: Arc<OpenFile>) -> Result<Self, &'static str> {
        let mut header = [0u8; EXEC_HEADER_SIZE];
        if file.read_at(&mut header, 0) != EXEC_HEADER_SIZE {
            return Err("executable: truncated header");
        }
        let rw = ByteRw::new(&mut header);
        if rw.read_u32(0) != EXEC_MAGIC {
            return Err("executable: bad magic");
        }
        Ok(Self {
            code: Segment::parse(&rw, 4),
            init_data: Segment::parse(&rw, 16),
            uninit_data: Segment::parse(&rw, 28),
            file,
        })
    }

    /// Total bytes of virtual address space the image needs, stack
    /// excluded.
    pub fn size(&self) -> usize {
        self.code.size + self.init_data.size + self.uninit_data.size
    }

    pub fn code(&self) -> Segment {
        self.code
    }

    pub fn init_data(&self) -> Segment {
        self.init_data
    }

    pub fn uninit_data(&self) -> Segment {
        self.uninit_data
    }

    /// Read code bytes starting `offset` bytes into the code segment.
    pub fn read_code_block(&self, buf: &mut [u8], offset: usize) -> usize {
        if offset >= self.code.size {
            return 0;
        }
        let n = buf.len().min(self.code.size - offset);
        self.file.read_at(&mut buf[..n], self.code.in_file_addr + offset)
    }

    /// Read initialized-data bytes starting `offset` bytes into the
    /// segment.
    pub fn read_data_block(&self, buf: &mut [u8], offset: usize) -> usize {
        if offset >= self.init_data.size {
            return 0;
        }
        let n = buf.len().min(self.init_data.size - offset);
        self.file
            .read_at(&mut buf[..n], self.init_data.in_file_addr + offset)
    }

    /// Assemble a flat image with the canonical layout: code at virtual
    /// address 0, initialized data right after, `uninit_size` bytes of
    /// zero-filled region at the end.
    pub fn build_image(code: &[u8], init_data: &[u8], uninit_size: usize) -> Vec<u8> {
        let mut image = vec![0u8; EXEC_HEADER_SIZE + code.len() + init_data.len()];
        {
            let mut rw = ByteRw::new(&mut image[..EXEC_HEADER_SIZE]);
            rw.write_u32(0, EXEC_MAGIC);
            // code
            rw.write_u32(4, 0);
            rw.write_u32(8, EXEC_HEADER_SIZE as u32);
            rw.write_u32(12, code.len() as u32);
            // init data
            rw.write_u32(16, code.len() as u32);
            rw.write_u32(20, (EXEC_HEADER_SIZE + code.len()) as u32);
            rw.write_u32(24, init_data.len() as u32);
            // uninit data
            rw.write_u32(28, (code.len() + init_data.len()) as u32);
            rw.write_u32(32, 0);
            rw.write_u32(36, uninit_size as u32);
        }
        image[EXEC_HEADER_SIZE..EXEC_HEADER_SIZE + code.len()].copy_from_slice(code);
        image[EXEC_HEADER_SIZE + code.len()..].copy_from_slice(init_data);
        image
    }
}
