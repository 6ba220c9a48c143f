//! Luminosity levels and the icon shown for each of them.

use std::fmt;

use super::topics::Room;

/// 5x5 matrix pattern, row 0 is the top row.
pub type Icon = [[bool; 5]; 5];

const OFF: [bool; 5] = [false; 5];
const ON: [bool; 5] = [true; 5];

static ICON_0: Icon = [OFF, OFF, OFF, OFF, OFF];
static ICON_20: Icon = [OFF, OFF, OFF, OFF, ON];
static ICON_40: Icon = [OFF, OFF, OFF, ON, ON];
static ICON_60: Icon = [OFF, OFF, ON, ON, ON];
static ICON_80: Icon = [OFF, ON, ON, ON, ON];
static ICON_100: Icon = [ON, ON, ON, ON, ON];

/// One of the six fill steps of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelBucket {
    Zero,
    Twenty,
    Forty,
    Sixty,
    Eighty,
    Hundred,
}

impl LevelBucket {
    /// Bucket for a raw level. Values below range land in `Zero`, above in `Hundred`.
    pub fn for_level(level: i32) -> Self {
        if level <= 20 {
            LevelBucket::Zero
        } else if level <= 40 {
            LevelBucket::Twenty
        } else if level <= 60 {
            LevelBucket::Forty
        } else if level <= 80 {
            LevelBucket::Sixty
        } else if level < 95 {
            LevelBucket::Eighty
        } else {
            LevelBucket::Hundred
        }
    }

    pub fn percent(self) -> u8 {
        match self {
            LevelBucket::Zero => 0,
            LevelBucket::Twenty => 20,
            LevelBucket::Forty => 40,
            LevelBucket::Sixty => 60,
            LevelBucket::Eighty => 80,
            LevelBucket::Hundred => 100,
        }
    }

    pub fn icon(self) -> &'static Icon {
        match self {
            LevelBucket::Zero => &ICON_0,
            LevelBucket::Twenty => &ICON_20,
            LevelBucket::Forty => &ICON_40,
            LevelBucket::Sixty => &ICON_60,
            LevelBucket::Eighty => &ICON_80,
            LevelBucket::Hundred => &ICON_100,
        }
    }
}

impl fmt::Display for LevelBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// What the panel shows for one room update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFrame {
    pub bucket: LevelBucket,
    pub room: Room,
    pub level: i32,
}

impl LevelFrame {
    pub fn new(room: Room, level: i32) -> Self {
        Self {
            bucket: LevelBucket::for_level(level),
            room,
            level,
        }
    }

    pub fn icon(&self) -> &'static Icon {
        self.bucket.icon()
    }

    pub fn room_label(&self) -> &'static str {
        self.room.label()
    }

    /// Level line of the display, e.g. `55%`.
    pub fn text(&self) -> String {
        format!("{}%", self.level)
    }
}

/// Parses a level payload the way `atoi` does.
///
/// Leading whitespace and one sign are accepted, digits are read up to the first
/// non-digit. Anything unparsable is 0; overflow saturates.
pub fn parse_level(payload: &str) -> i32 {
    let trimmed = payload.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i32 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i32::from(byte - b'0');
        value = value.saturating_mul(10);
        value = if negative {
            value.saturating_sub(digit)
        } else {
            value.saturating_add(digit)
        };
    }
    value
}
