/// contiguous guest RAM
#[derive(Clone, Default)]
pub struct FlatMemory {
    pub data: Vec<u8>,
}

impl FlatMemory {
    pub fn new(size: usize) -> Self {
        FlatMemory { data: vec![0u8; size] }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// reads outside of installed memory float high
    pub fn read_u8(&self, addr: u32) -> u8 {
        match self.data.get(addr as usize) {
            Some(b) => *b,
            None => 0xFF,
        }
    }

    /// writes outside of installed memory are dropped
    pub fn write_u8(&mut self, addr: u32, data: u8) {
        if let Some(b) = self.data.get_mut(addr as usize) {
            *b = data;
        }
    }
}
