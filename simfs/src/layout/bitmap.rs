use super::BlockId;

/// 位图，一位对应一块，置 1 表示已分配。
///
/// 位序与镜像一致：第 0 块对应第 0 字节的最高位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
    /// 有效位数，即卷的块数
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// 由镜像中读出的字节构造，多余的字节被丢弃
    pub fn from_bytes(mut bytes: Vec<u8>, len: usize) -> Self {
        bytes.resize(len.div_ceil(8), 0);
        Self { bytes, len }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 寻找第一个空闲块，但不占用它。
    ///
    /// 先跳过全满的字节，再在第一个未满的字节内逐位查找；
    /// 越过有效位数即视为卷已满。
    pub fn find_free_block(&self) -> Option<BlockId> {
        let (byte_index, &byte) = self
            .bytes
            .iter()
            .enumerate()
            .find(|&(_, &byte)| byte != u8::MAX)?;
        let index = byte_index * 8 + byte.leading_ones() as usize;
        // 末字节的填充位永远为 0，因此越界即说明有效位全满
        (index < self.len).then(|| BlockId::from(index as u32))
    }

    #[inline]
    pub fn is_set(&self, id: BlockId) -> bool {
        let (byte, mask) = self.locate(id);
        self.bytes[byte] & mask != 0
    }

    #[inline]
    pub fn set_bit(&mut self, id: BlockId) {
        let (byte, mask) = self.locate(id);
        self.bytes[byte] |= mask;
    }

    #[inline]
    pub fn clear_bit(&mut self, id: BlockId) {
        let (byte, mask) = self.locate(id);
        self.bytes[byte] &= !mask;
    }

    #[inline]
    pub fn flip_bit(&mut self, id: BlockId) {
        let (byte, mask) = self.locate(id);
        self.bytes[byte] ^= mask;
    }

    /// 只统计有效位，填充位不计入
    pub fn count_free(&self) -> usize {
        let used = self.bytes.iter().map(|b| b.count_ones() as usize).sum::<usize>()
            - self.padding().count_ones() as usize;
        self.len - used
    }

    /// 末字节的填充位全为 0
    #[inline]
    pub fn padding_is_clear(&self) -> bool {
        self.padding() == 0
    }

    /// 末字节中超出有效位数的那些位
    fn padding(&self) -> u8 {
        match self.len % 8 {
            0 => 0,
            tail => self.bytes.last().map_or(0, |&byte| byte & (u8::MAX >> tail)),
        }
    }

    fn locate(&self, id: BlockId) -> (usize, u8) {
        let index = id.index();
        assert!(index < self.len, "bit {index} out of range (0..{})", self.len);
        (index / 8, 0x80 >> (index % 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u32) -> BlockId {
        BlockId::from(i)
    }

    #[test]
    fn bit_operations() {
        let mut bitmap = Bitmap::from_bytes(vec![0xFF; 6], 48);
        assert_eq!(bitmap.find_free_block(), None);

        bitmap.flip_bit(id(44));
        assert_eq!(bitmap.find_free_block(), Some(id(44)));
        bitmap.clear_bit(id(33));
        assert_eq!(bitmap.find_free_block(), Some(id(33)));
        bitmap.set_bit(id(33));
        assert_eq!(bitmap.find_free_block(), Some(id(44)));
        assert_eq!(bitmap.count_free(), 1);
    }

    #[test]
    fn msb_first_order() {
        let mut bitmap = Bitmap::new(16);
        bitmap.set_bit(id(0));
        bitmap.set_bit(id(9));
        assert_eq!(bitmap.as_bytes(), &[0x80, 0x40]);
        assert_eq!(bitmap.find_free_block(), Some(id(1)));
    }

    #[test]
    fn full_partial_byte_is_exhausted() {
        let mut bitmap = Bitmap::new(10);
        for i in 0..10 {
            assert_eq!(bitmap.find_free_block(), Some(id(i)));
            bitmap.flip_bit(id(i));
        }
        // 填充位仍为 0，但不能被当作空闲块
        assert_eq!(bitmap.find_free_block(), None);
        assert_eq!(bitmap.count_free(), 0);
    }

    #[test]
    fn padding_bits_are_not_blocks() {
        // 9 块：第 1 字节只有最高位有效
        let bitmap = Bitmap::from_bytes(vec![0x00, 0xFF], 9);
        assert!(!bitmap.padding_is_clear());
        assert_eq!(bitmap.count_free(), 8);

        let bitmap = Bitmap::from_bytes(vec![0x00, 0x80], 9);
        assert!(bitmap.padding_is_clear());
        assert_eq!(bitmap.count_free(), 8);
        assert!(Bitmap::from_bytes(vec![0xFF], 8).padding_is_clear());
    }

    #[test]
    #[should_panic]
    fn out_of_range_bit_panics() {
        let mut bitmap = Bitmap::new(10);
        bitmap.set_bit(id(10));
    }
}
