//! Little-endian field access over raw disk bytes. All on-disk structures
//! go through this instead of transmuting; layouts stay explicit.

pub struct ByteRw<'a> {
    b: &'a mut [u8],
}

impl<'a> ByteRw<'a> {
    pub fn new(b: &'a mut [u8]) -> Self {
        Self { b }
    }

    #[inline]
    pub fn read_u8(&self, p: usize) -> u8 {
        self.b[p]
    }

    #[inline]
    pub fn read_u32(&self, p: usize) -> u32 {
        u32::from_le_bytes(self.b[p..p + 4].try_into().expect("u32 field"))
    }

    #[inline]
    pub fn write_u8(&mut self, p: usize, v: u8) {
        self.b[p] = v;
    }

    #[inline]
    pub fn write_u32(&mut self, p: usize, v: u32) {
        self.b[p..p + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn bytes(&self, p: usize, n: usize) -> &[u8] {
        &self.b[p..p + n]
    }

    #[inline]
    pub fn write_bytes(&mut self, p: usize, v: &[u8]) {
        self.b[p..p + v.len()].copy_from_slice(v);
    }
}
