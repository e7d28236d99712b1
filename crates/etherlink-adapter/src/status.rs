/// Result codes handed back to guest driver calls.
///
/// Guest code compares these literally; the numeric values are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum EtherStatus {
    NoErr = 0,
    MultiErr = -91,
    LenErr = -92,
    LapProtErr = -94,
    ExcessCollisions = -95,
}

impl EtherStatus {
    pub const fn code(self) -> i16 {
        self as i16
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, EtherStatus::NoErr)
    }
}

impl From<EtherStatus> for i16 {
    fn from(status: EtherStatus) -> Self {
        status.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EtherStatus::NoErr.code(), 0);
        assert_eq!(EtherStatus::MultiErr.code(), -91);
        assert_eq!(EtherStatus::LenErr.code(), -92);
        assert_eq!(EtherStatus::LapProtErr.code(), -94);
        assert_eq!(i16::from(EtherStatus::ExcessCollisions), -95);
    }
}
