//! Lightweight Japanese date/time phrase parsing for flow answers. Free-form
//! creation text goes through the language model instead; these parsers only
//! need to cover the short answers the bot explicitly asks for.

use chrono::{Duration, NaiveDate, NaiveTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedTime {
    AllDay,
    At {
        start: NaiveTime,
        end: Option<NaiveTime>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Token {
    Time { hour: u32, minute: u32 },
    MonthDay { month: u32, day: u32 },
    Ymd { year: i32, month: u32, day: u32 },
}

pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = normalize(text);

    // 明後日 contains 明日 as a substring, so check it first.
    if text.contains("明後日") {
        return Some(today + Duration::days(2));
    }
    if text.contains("明日") {
        return Some(today + Duration::days(1));
    }
    if text.contains("今日") {
        return Some(today);
    }

    scan(&text).into_iter().find_map(|token| match token {
        Token::MonthDay { month, day } => resolve_month_day(today, month, day),
        Token::Ymd { year, month, day } => NaiveDate::from_ymd_opt(year, month, day),
        Token::Time { .. } => None,
    })
}

pub fn parse_time(text: &str) -> Option<ParsedTime> {
    let text = normalize(text);
    if text.contains("終日") {
        return Some(ParsedTime::AllDay);
    }

    let times: Vec<NaiveTime> = scan(&text)
        .into_iter()
        .filter_map(|token| match token {
            Token::Time { hour, minute } => NaiveTime::from_hms_opt(hour, minute, 0),
            _ => None,
        })
        .collect();

    let start = *times.first()?;
    Some(ParsedTime::At {
        start,
        end: times.get(1).copied(),
    })
}

/// `Some(None)` means the user explicitly asked for no due date.
pub fn parse_due(text: &str, today: NaiveDate) -> Option<Option<NaiveDate>> {
    let trimmed = text.trim();
    if ["期限なし", "なし", "いつか", "未定"].contains(&trimmed) {
        return Some(None);
    }
    parse_date(trimmed, today).map(Some)
}

/// Combined parse for update answers like 「明日15時」. Either side may be
/// absent.
pub fn parse_date_time(
    text: &str,
    today: NaiveDate,
) -> (Option<NaiveDate>, Option<ParsedTime>) {
    (parse_date(text, today), parse_time(text))
}

fn resolve_month_day(today: NaiveDate, month: u32, day: u32) -> Option<NaiveDate> {
    use chrono::Datelike;
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if this_year < today {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)
    } else {
        Some(this_year)
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32('0' as u32 + (c as u32 - '０' as u32)).unwrap_or(c),
            '：' => ':',
            '／' => '/',
            '－' | 'ー' => '-',
            _ => c,
        })
        .collect()
}

fn scan(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let (first, next) = read_number(&chars, i);
        i = next;

        match chars.get(i) {
            Some(':') => {
                let (minute, next) = read_number(&chars, i + 1);
                if next > i + 1 && first < 24 && minute < 60 {
                    tokens.push(Token::Time {
                        hour: first as u32,
                        minute: minute as u32,
                    });
                }
                i = next;
            }
            Some('時') => {
                i += 1;
                let minute = match chars.get(i) {
                    Some('半') => {
                        i += 1;
                        30
                    }
                    Some(c) if c.is_ascii_digit() => {
                        let (value, next) = read_number(&chars, i);
                        if chars.get(next) == Some(&'分') {
                            i = next + 1;
                            value as u32
                        } else {
                            // Digits after 時 without 分 belong to the next
                            // token (e.g. 14時15:00 is malformed anyway).
                            0
                        }
                    }
                    _ => 0,
                };
                if first < 24 && minute < 60 {
                    tokens.push(Token::Time {
                        hour: first as u32,
                        minute,
                    });
                }
            }
            Some('月') => {
                let (day, next) = read_number(&chars, i + 1);
                if chars.get(next) == Some(&'日') && valid_month_day(first, day) {
                    tokens.push(Token::MonthDay {
                        month: first as u32,
                        day: day as u32,
                    });
                    i = next + 1;
                }
            }
            Some('/') | Some('-') => {
                let separator = chars[i];
                let (second, next) = read_number(&chars, i + 1);
                if next == i + 1 {
                    i += 1;
                    continue;
                }
                if chars.get(next) == Some(&separator) {
                    let (third, after) = read_number(&chars, next + 1);
                    if after > next + 1 && valid_month_day(second, third) {
                        tokens.push(Token::Ymd {
                            year: first as i32,
                            month: second as u32,
                            day: third as u32,
                        });
                        i = after;
                        continue;
                    }
                }
                if valid_month_day(first, second) {
                    tokens.push(Token::MonthDay {
                        month: first as u32,
                        day: second as u32,
                    });
                }
                i = next;
            }
            _ => {}
        }
    }

    tokens
}

fn read_number(chars: &[char], start: usize) -> (u64, usize) {
    let mut value: u64 = 0;
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() && i - start < 6 {
        value = value * 10 + chars[i].to_digit(10).unwrap_or(0) as u64;
        i += 1;
    }
    (value, i)
}

fn valid_month_day(month: u64, day: u64) -> bool {
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::{ParsedTime, parse_date, parse_date_time, parse_due, parse_time};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn relative_dates() {
        assert_eq!(parse_date("今日", today()), Some(today()));
        assert_eq!(
            parse_date("明日", today()),
            NaiveDate::from_ymd_opt(2026, 3, 3)
        );
        assert_eq!(
            parse_date("明後日の午後", today()),
            NaiveDate::from_ymd_opt(2026, 3, 4)
        );
    }

    #[test]
    fn month_day_forms() {
        assert_eq!(
            parse_date("3月10日", today()),
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
        assert_eq!(
            parse_date("3/10", today()),
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
        assert_eq!(
            parse_date("２０２６/３/１０", today()),
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
        assert_eq!(
            parse_date("2026-03-10", today()),
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
    }

    #[test]
    fn past_month_day_rolls_to_next_year() {
        assert_eq!(
            parse_date("1月15日", today()),
            NaiveDate::from_ymd_opt(2027, 1, 15)
        );
    }

    #[test]
    fn time_forms() {
        assert_eq!(
            parse_time("14時"),
            Some(ParsedTime::At {
                start: t(14, 0),
                end: None
            })
        );
        assert_eq!(
            parse_time("14時半"),
            Some(ParsedTime::At {
                start: t(14, 30),
                end: None
            })
        );
        assert_eq!(
            parse_time("14:00〜15:30"),
            Some(ParsedTime::At {
                start: t(14, 0),
                end: Some(t(15, 30))
            })
        );
        assert_eq!(
            parse_time("14時から15時"),
            Some(ParsedTime::At {
                start: t(14, 0),
                end: Some(t(15, 0))
            })
        );
        assert_eq!(parse_time("終日"), Some(ParsedTime::AllDay));
        assert_eq!(parse_time("よろしく"), None);
    }

    #[test]
    fn date_digits_are_not_times() {
        // 3/10 must not produce a 03:10 time token.
        assert_eq!(parse_time("3/10"), None);
    }

    #[test]
    fn due_accepts_explicit_none() {
        assert_eq!(parse_due("期限なし", today()), Some(None));
        assert_eq!(parse_due("なし", today()), Some(None));
        assert_eq!(
            parse_due("3/10", today()),
            Some(NaiveDate::from_ymd_opt(2026, 3, 10))
        );
        assert_eq!(parse_due("うーん", today()), None);
    }

    #[test]
    fn combined_update_answer() {
        let (date, time) = parse_date_time("明日15時", today());
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 3));
        assert_eq!(
            time,
            Some(ParsedTime::At {
                start: t(15, 0),
                end: None
            })
        );
    }
}
