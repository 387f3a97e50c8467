/// 定长槽位表：空槽位可被复用，下标在元素存活期间保持不变
#[derive(Debug, Clone)]
pub struct SlotVec<T> {
    slots: Vec<Option<T>>,
    /// 槽位数量上限
    limit: usize,
}

impl<T> SlotVec<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            limit,
        }
    }

    /// 插入新元素至空槽位，并返回槽位的索引；槽位用尽时返回空
    pub fn insert(&mut self, element: T) -> Option<usize> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None if self.slots.len() < self.limit => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return None,
        };
        self.slots[index] = Some(element);
        Some(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index)?.take()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// 存活元素的个数
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 依次返回存活元素的 `(索引, 元素)`
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|element| (index, element)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_freed_slots() {
        let mut slots = SlotVec::new(3);
        assert_eq!(slots.insert('a'), Some(0));
        assert_eq!(slots.insert('b'), Some(1));
        assert_eq!(slots.remove(0), Some('a'));
        assert_eq!(slots.insert('c'), Some(0));
        assert_eq!(slots.get(1), Some(&'b'));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn respects_limit() {
        let mut slots = SlotVec::new(2);
        slots.insert(1);
        slots.insert(2);
        assert_eq!(slots.insert(3), None);
        slots.remove(1);
        assert_eq!(slots.insert(3), Some(1));
        assert_eq!(slots.remove(7), None);
    }
}
