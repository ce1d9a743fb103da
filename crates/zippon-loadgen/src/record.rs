//! Random `User` records rendered as ZipponDB `ADD` commands.
//!
//! Every field is drawn independently. Some draws sit deliberately outside
//! what a well-behaved client would send:
//! - score arrays may be drawn with length `-1` (rendered as `[]`)
//! - scores may be `-1`
//! - timestamps always carry six fractional digits

use std::fmt;
use std::ops::RangeInclusive;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const AGE_RANGE: RangeInclusive<u8> = 0..=100;
pub const SCORES_LEN_RANGE: RangeInclusive<i32> = -1..=10;
pub const SCORE_VALUE_RANGE: RangeInclusive<i32> = -1..=100;

/// 1970-01-01 .. 2025-12-31, as days from the common era.
const DAY_RANGE_CE: RangeInclusive<i32> = 719_163..=739_616;

pub const DATE_FORMAT: &str = "%Y/%m/%d";
pub const DATETIME_FORMAT: &str = "%Y/%m/%d-%H:%M:%S%.6f";
pub const TIME_FORMAT: &str = "%H:%M:%S%.6f";

const FIRST_NAMES: &[&str] = &[
    "Adrien", "Alice", "Amara", "Bruno", "Camille", "Chen", "Dmitri", "Elena", "Farah", "Gabriel",
    "Hana", "Igor", "Jasmine", "Kofi", "Lea", "Marco", "Nadia", "Oscar", "Priya", "Quentin",
    "Rosa", "Sven", "Tomas", "Ursula", "Victor", "Wen", "Yara", "Zoe",
];

const LAST_NAMES: &[&str] = &[
    "Anderson", "Bauer", "Costa", "Dubois", "Eriksen", "Fischer", "Garcia", "Hoffman", "Ivanova",
    "Jensen", "Kowalski", "Lambert", "Moreau", "Nakamura", "Okafor", "Petrov", "Quinn", "Rossi",
    "Schmidt", "Tanaka", "Urban", "Vasquez", "Weber", "Young", "Zhang",
];

const MAIL_DOMAINS: &[&str] = &["example.com", "example.org", "example.net"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub age: u8,
    pub email: String,
    pub scores: Vec<i32>,
    /// Always empty: the generator never links users.
    pub friends: Vec<String>,
    pub bday: NaiveDate,
    pub last_order: NaiveDateTime,
    pub a_time: NaiveTime,
}

impl UserRecord {
    pub fn to_command(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ADD User (name = '{}',age = {},email = '{}',scores={},friends = {},bday={},last_order={},a_time={})",
            self.name,
            self.age,
            self.email,
            format_int_array(&self.scores),
            format_friends(&self.friends),
            self.bday.format(DATE_FORMAT),
            self.last_order.format(DATETIME_FORMAT),
            self.a_time.format(TIME_FORMAT),
        )
    }
}

/// `[1 2 3]`, or `[]` when empty.
pub fn format_int_array(values: &[i32]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(" "))
}

fn format_friends(friends: &[String]) -> String {
    format!("[{}]", friends.join(" "))
}

/// Draw `len` scores. A zero or negative length yields an empty array.
pub fn scores_from_length<R: Rng + ?Sized>(rng: &mut R, len: i32) -> Vec<i32> {
    let count = usize::try_from(len).unwrap_or(0);
    (0..count)
        .map(|_| rng.gen_range(SCORE_VALUE_RANGE))
        .collect()
}

#[derive(Debug, Clone)]
pub struct RecordGenerator<R = StdRng> {
    rng: R,
}

impl RecordGenerator<StdRng> {
    /// Deterministic: the same seed yields the same command sequence.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> RecordGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn next_record(&mut self) -> UserRecord {
        let first = pick(&mut self.rng, FIRST_NAMES);
        let last = pick(&mut self.rng, LAST_NAMES);
        let name = format!("{first} {last}");
        let age = self.rng.gen_range(AGE_RANGE);
        let email = self.email();
        let len = self.rng.gen_range(SCORES_LEN_RANGE);
        let scores = scores_from_length(&mut self.rng, len);
        let bday = self.date();
        let last_order = NaiveDateTime::new(self.date(), self.time());
        let a_time = self.time();

        UserRecord {
            name,
            age,
            email,
            scores,
            friends: Vec::new(),
            bday,
            last_order,
            a_time,
        }
    }

    pub fn next_command(&mut self) -> String {
        self.next_record().to_command()
    }

    // Drawn separately from the display name, like an independent fake email.
    fn email(&mut self) -> String {
        let first = pick(&mut self.rng, FIRST_NAMES).to_ascii_lowercase();
        let last = pick(&mut self.rng, LAST_NAMES).to_ascii_lowercase();
        let n: u16 = self.rng.gen_range(0..1000);
        let domain = pick(&mut self.rng, MAIL_DOMAINS);
        format!("{first}.{last}{n}@{domain}")
    }

    fn date(&mut self) -> NaiveDate {
        let day = self.rng.gen_range(DAY_RANGE_CE);
        NaiveDate::from_num_days_from_ce_opt(day).unwrap_or_default()
    }

    fn time(&mut self) -> NaiveTime {
        let secs: u32 = self.rng.gen_range(0..86_400);
        let micros: u32 = self.rng.gen_range(0..1_000_000);
        NaiveTime::from_num_seconds_from_midnight_opt(secs, micros * 1_000).unwrap_or_default()
    }
}

impl<R: Rng> Iterator for RecordGenerator<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        Some(self.next_command())
    }
}

fn pick<'a, R: Rng + ?Sized>(rng: &mut R, pool: &[&'a str]) -> &'a str {
    pool[rng.gen_range(0..pool.len())]
}
