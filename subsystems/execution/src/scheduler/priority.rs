//! # Priority Management
//!
//! Priority never influences which thread is picked; it only sets how many
//! timer ticks a thread may run before it is asked to give up the core.

/// Thread and process priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Lowest
    VeryLow = 0,
    /// Below normal
    Low = 1,
    /// Normal
    #[default]
    Normal = 2,
    /// Above normal
    High = 3,
    /// Highest
    VeryHigh = 4,
}

impl Priority {
    /// Every level, lowest first
    pub const ALL: [Priority; 5] = [
        Priority::VeryLow,
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::VeryHigh,
    ];

    /// Convert from the raw value used in atomics and syscall arguments
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Ticks granted per slice: `(priority + 1) * multiplier`
    pub fn tick_budget(self, multiplier: u64) -> u64 {
        (self.as_u8() as u64 + 1) * multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_scales_linearly() {
        assert_eq!(Priority::VeryLow.tick_budget(3), 3);
        assert_eq!(Priority::Normal.tick_budget(3), 9);
        assert_eq!(Priority::VeryHigh.tick_budget(3), 15);
    }

    #[test]
    fn raw_values_round_trip() {
        for priority in Priority::ALL {
            assert_eq!(Priority::from_u8(priority.as_u8()), Some(priority));
        }
        assert_eq!(Priority::from_u8(5), None);
    }
}
