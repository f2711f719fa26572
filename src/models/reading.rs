use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadingKind {
    Light,
    Proximity,
}

/// A single raw sensor sample as delivered by the platform. Superseded by the
/// next reading of the same kind; never persisted.
#[derive(Clone, Debug)]
pub struct Reading {
    pub kind: ReadingKind,
    pub value: f32,
    pub timestamp: OffsetDateTime,
}

impl Reading {
    pub fn light(value: f32) -> Self {
        Self {
            kind: ReadingKind::Light,
            value,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn proximity(value: f32) -> Self {
        Self {
            kind: ReadingKind::Proximity,
            value,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
