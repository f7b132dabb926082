use crate::resource_model::{KERNEL_BITMAP_BITS, RESOURCE_BITMAP_BITS};
use psys_commons::KernelId;
use serde::{Deserialize, Serialize};

/// Bit `i` set means resource `i` is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceBitmap(pub u32);

impl ResourceBitmap {
    pub const EMPTY: ResourceBitmap = ResourceBitmap(0);

    /// Single bit at `index`, empty if the index does not fit.
    pub const fn bit_mask(index: usize) -> Self {
        if index >= RESOURCE_BITMAP_BITS {
            return Self::EMPTY;
        }
        return ResourceBitmap(1 << index);
    }

    pub const fn union(self, other: Self) -> Self {
        return ResourceBitmap(self.0 | other.0);
    }

    pub const fn intersection(self, other: Self) -> Self {
        return ResourceBitmap(self.0 & other.0);
    }

    pub const fn xor(self, other: Self) -> Self {
        return ResourceBitmap(self.0 ^ other.0);
    }

    pub const fn set(self, bits: Self) -> Self {
        return self.union(bits);
    }

    pub const fn clear(self, bits: Self) -> Self {
        return ResourceBitmap(self.0 & !bits.0);
    }

    /// Set `bits` only if none of them is held yet, empty bitmap otherwise.
    pub const fn set_unique(self, bits: Self) -> Self {
        if self.0 & bits.0 != 0 {
            return Self::EMPTY;
        }
        return self.union(bits);
    }

    /// All of `bits` are held.
    pub const fn is_set(self, bits: Self) -> bool {
        return self.0 & bits.0 == bits.0;
    }

    /// None of `bits` is held.
    pub const fn is_clear(self, bits: Self) -> bool {
        return self.0 & bits.0 == 0;
    }

    pub const fn is_bit_set(self, index: usize) -> bool {
        return index < RESOURCE_BITMAP_BITS && (self.0 >> index) & 1 == 1;
    }

    pub const fn is_empty(self) -> bool {
        return self.0 == 0;
    }

    pub const fn weight(self) -> u32 {
        return self.0.count_ones();
    }

    pub fn iter_set(self) -> impl Iterator<Item = usize> {
        return (0..RESOURCE_BITMAP_BITS).filter(move |index| self.is_bit_set(*index));
    }
}

/// Kernel enable bitmap, one bit per kernel of the program group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct KernelBitmap(pub u128);

impl KernelBitmap {
    pub const EMPTY: KernelBitmap = KernelBitmap(0);

    pub const fn bit_mask(kernel: KernelId) -> Self {
        if (kernel as usize) >= KERNEL_BITMAP_BITS {
            return Self::EMPTY;
        }
        return KernelBitmap(1 << kernel);
    }

    pub fn from_kernels(kernels: &[KernelId]) -> Self {
        return kernels
            .iter()
            .fold(Self::EMPTY, |bitmap, kernel| bitmap.union(Self::bit_mask(*kernel)));
    }

    pub const fn union(self, other: Self) -> Self {
        return KernelBitmap(self.0 | other.0);
    }

    pub const fn intersection(self, other: Self) -> Self {
        return KernelBitmap(self.0 & other.0);
    }

    pub const fn intersects(self, other: Self) -> bool {
        return self.0 & other.0 != 0;
    }

    pub const fn is_subset_of(self, other: Self) -> bool {
        return self.0 & !other.0 == 0;
    }

    pub const fn is_bit_set(self, kernel: KernelId) -> bool {
        return (kernel as usize) < KERNEL_BITMAP_BITS && (self.0 >> kernel) & 1 == 1;
    }

    pub const fn is_empty(self) -> bool {
        return self.0 == 0;
    }

    pub fn kernels(self) -> impl Iterator<Item = KernelId> {
        return (0..KERNEL_BITMAP_BITS as u16)
            .map(|kernel| kernel as KernelId)
            .filter(move |kernel| self.is_bit_set(*kernel));
    }
}

// serialized as the list of enabled kernel ids, which is how manifests spell them
impl Serialize for KernelBitmap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        return serializer.collect_seq(self.kernels());
    }
}

impl<'de> Deserialize<'de> for KernelBitmap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kernels = Vec::<u16>::deserialize(deserializer)?;
        let mut bitmap = KernelBitmap::EMPTY;
        for kernel in kernels {
            if kernel as usize >= KERNEL_BITMAP_BITS {
                return Err(serde::de::Error::custom(format!(
                    "kernel id {} does not fit the kernel bitmap",
                    kernel
                )));
            }
            bitmap = bitmap.union(KernelBitmap::bit_mask(kernel as KernelId));
        }
        return Ok(bitmap);
    }
}
