//! Station database dump format.
//!
//! ```text
//! Station 0 ["urandom"] clients:
//!     - 127.0.0.1:10000
//! Station 1 ["test.txt"] clients:
//! ```
//!
//! A header line is any line containing "station" (any case). Its id is the
//! first run of decimal digits on the line and its song is the text between
//! the first two double quotes. Every other non-blank line lists one client of
//! the most recent header: the text after its first `-`, trimmed.

use snowstorm_core::error::{HarnessError, Result};
use snowstorm_core::station::{Station, StationDatabase, StationId};
use tracing::debug;
use winnow::ModalResult;
use winnow::ascii::digit1;
use winnow::combinator::{delimited, preceded};
use winnow::prelude::*;
use winnow::token::take_till;

pub fn parse_station_dump(input: &str) -> Result<StationDatabase> {
    let mut stations: Vec<Station> = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let line_no = index + 1;
        if raw.trim().is_empty() {
            continue;
        }

        if is_header(raw) {
            stations.push(parse_header(raw, line_no)?);
            continue;
        }

        let Some(current) = stations.last_mut() else {
            return Err(HarnessError::MalformedClientLine {
                line_no,
                line: raw.to_owned(),
                reason: "client listed before any station header",
            });
        };
        let Some((_, client)) = raw.split_once('-') else {
            return Err(HarnessError::MalformedClientLine {
                line_no,
                line: raw.to_owned(),
                reason: "missing '-' before client address",
            });
        };
        current.add_client(client.trim());
    }

    debug!("Parsed {} station records", stations.len());
    Ok(stations.into_iter().collect())
}

/// Renders stations in the layout `parse_station_dump` reads back
pub fn render_station_dump<'a>(stations: impl IntoIterator<Item = &'a Station>) -> String {
    stations.into_iter().map(ToString::to_string).collect()
}

fn is_header(line: &str) -> bool {
    line.to_ascii_lowercase().contains("station")
}

fn parse_header(line: &str, line_no: usize) -> Result<Station> {
    let malformed = |reason| HarnessError::MalformedHeader {
        line_no,
        line: line.to_owned(),
        reason,
    };

    if !line.chars().any(|c| c.is_ascii_digit()) {
        return Err(malformed("missing station number"));
    }
    let id = first_number
        .parse_next(&mut &*line)
        .map_err(|_| malformed("station number out of range"))?;
    let song = quoted_song
        .parse_next(&mut &*line)
        .map_err(|_| malformed("missing quoted song name"))?;

    Ok(Station::new(id, song))
}

fn first_number(input: &mut &str) -> ModalResult<StationId> {
    preceded(take_till(0.., |c: char| c.is_ascii_digit()), digit1)
        .try_map(|digits: &str| digits.parse::<StationId>())
        .parse_next(input)
}

fn quoted_song(input: &mut &str) -> ModalResult<String> {
    preceded(take_till(0.., '"'), delimited('"', take_till(0.., '"'), '"'))
        .map(|song: &str| song.to_owned())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_and_clients() {
        let db = parse_station_dump("Station 3 [\"Song\"]\nx - addrA\ny - addrB\n").unwrap();

        let station = db.get(3).unwrap();
        assert_eq!(station.id, 3);
        assert_eq!(station.song, "Song");
        assert!(station.has_clients(&["addrB", "addrA"]));
    }

    #[test]
    fn test_header_without_digit_is_malformed() {
        let err = parse_station_dump("Station [\"Song\"]\n").unwrap_err();
        assert!(matches!(
            err,
            HarnessError::MalformedHeader {
                line_no: 1,
                reason: "missing station number",
                ..
            }
        ));
    }

    #[test]
    fn test_header_without_quotes_is_malformed() {
        let err = parse_station_dump("STATION 2 no song here\n").unwrap_err();
        assert!(matches!(
            err,
            HarnessError::MalformedHeader {
                reason: "missing quoted song name",
                ..
            }
        ));
    }

    #[test]
    fn test_header_id_out_of_range() {
        let err = parse_station_dump("Station 70000 [\"x\"]\n").unwrap_err();
        assert!(matches!(err, HarnessError::MalformedHeader { .. }));
    }

    #[test]
    fn test_header_takes_whole_digit_run() {
        let db = parse_station_dump("station 12 [\"Caravan 1958\"]\n").unwrap();
        let station = db.get(12).unwrap();
        assert_eq!(station.song, "Caravan 1958");
    }

    #[test]
    fn test_client_before_header_is_error() {
        let err = parse_station_dump("\t - 127.0.0.1:10000\nStation 0 [\"a\"]\n").unwrap_err();
        assert!(matches!(
            err,
            HarnessError::MalformedClientLine { line_no: 1, .. }
        ));
    }

    #[test]
    fn test_client_line_without_dash_is_error() {
        let err = parse_station_dump("Station 0 [\"a\"]\n127.0.0.1:10000\n").unwrap_err();
        assert!(matches!(
            err,
            HarnessError::MalformedClientLine { line_no: 2, .. }
        ));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let dump = concat!(
            "\nStation 0 [\"a\"] clients:\n\n",
            "\t - 127.0.0.1:10000\n   \n",
            "Station 1 [\"b\"] clients:\n",
        );
        let db = parse_station_dump(dump).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.clients_of(0), ["127.0.0.1:10000"]);
        assert!(db.clients_of(1).is_empty());
    }

    #[test]
    fn test_client_keeps_text_after_first_dash() {
        let db = parse_station_dump("Station 0 [\"a\"]\n - host-with-dash:10000\n").unwrap();
        assert_eq!(db.clients_of(0), ["host-with-dash:10000"]);
    }

    #[test]
    fn test_duplicate_clients_are_kept() {
        let db = parse_station_dump("Station 0 [\"a\"]\n - c\n - c\n").unwrap();
        assert_eq!(db.clients_of(0).len(), 2);
    }

    #[test]
    fn test_rendered_dump_parses_back() {
        let mut zero = Station::new(0, "Beethoven-SymphonyNo5.mp3");
        zero.add_client("127.0.0.1:10000");
        let one = Station::new(1, "FX-Impact193.mp3");

        let text = render_station_dump([&zero, &one]);
        let db = parse_station_dump(&text).unwrap();
        assert_eq!(db.get(0), Some(&zero));
        assert_eq!(db.get(1), Some(&one));
    }
}
