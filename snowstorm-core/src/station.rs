use std::fmt;

/// Station id as assigned by the server's catalog (position on its command line)
pub type StationId = u16;

/// One station as reported by a server dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub id: StationId,
    pub song: String,
    pub clients: Vec<String>,
}

impl Station {
    pub fn new(id: StationId, song: impl Into<String>) -> Self {
        Self {
            id,
            song: song.into(),
            clients: Vec::new(),
        }
    }

    pub fn add_client(&mut self, client: impl Into<String>) {
        self.clients.push(client.into());
    }

    pub fn has_client(&self, client: &str) -> bool {
        self.clients.iter().any(|c| c == client)
    }

    /// Order-insensitive, duplicate-aware comparison against `clients`
    pub fn has_clients<S: AsRef<str>>(&self, clients: &[S]) -> bool {
        crate::verify::matches(
            clients.iter().map(AsRef::as_ref),
            self.clients.iter().map(String::as_str),
        )
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Station {} [\"{}\"] clients:", self.id, self.song)?;
        for client in &self.clients {
            writeln!(f, "\t - {client}")?;
        }
        Ok(())
    }
}

/// Point-in-time snapshot of the server's station table.
///
/// Built once per dump and never mutated afterwards; stations keep the order
/// in which their ids first appeared in the dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationDatabase {
    stations: Vec<Station>,
}

impl StationDatabase {
    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Clients listed under `id`; an absent station has none.
    pub fn clients_of(&self, id: StationId) -> &[String] {
        self.get(id).map(|s| s.clients.as_slice()).unwrap_or(&[])
    }
}

impl FromIterator<Station> for StationDatabase {
    /// A repeated id replaces the earlier record in place.
    fn from_iter<I: IntoIterator<Item = Station>>(iter: I) -> Self {
        let mut stations: Vec<Station> = Vec::new();
        for station in iter {
            match stations.iter_mut().find(|s| s.id == station.id) {
                Some(existing) => *existing = station,
                None => stations.push(station),
            }
        }
        Self { stations }
    }
}

impl<'a> IntoIterator for &'a StationDatabase {
    type Item = &'a Station;
    type IntoIter = std::slice::Iter<'a, Station>;

    fn into_iter(self) -> Self::IntoIter {
        self.stations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: StationId, song: &str, clients: &[&str]) -> Station {
        let mut s = Station::new(id, song);
        for c in clients {
            s.add_client(*c);
        }
        s
    }

    #[test]
    fn test_lookup_by_id_keeps_first_seen_order() {
        let db: StationDatabase = vec![
            station(2, "Caravan", &[]),
            station(0, "urandom", &["127.0.0.1:10000"]),
        ]
        .into_iter()
        .collect();

        let ids: Vec<_> = db.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 0]);
        assert_eq!(db.get(0).unwrap().song, "urandom");
        assert!(db.get(1).is_none());
        assert!(db.clients_of(1).is_empty());
    }

    #[test]
    fn test_repeated_id_replaces_record() {
        let db: StationDatabase = vec![
            station(1, "old", &["a"]),
            station(3, "other", &[]),
            station(1, "new", &[]),
        ]
        .into_iter()
        .collect();

        assert_eq!(db.len(), 2);
        assert_eq!(db.get(1).unwrap().song, "new");
        assert!(db.clients_of(1).is_empty());
        assert_eq!(db.iter().next().unwrap().id, 1);
    }

    #[test]
    fn test_has_clients_ignores_order() {
        let s = station(0, "x", &["b", "a", "a"]);
        assert!(s.has_clients(&["a", "b", "a"]));
        assert!(!s.has_clients(&["a", "b"]));
        assert!(s.has_client("b"));
        assert!(!s.has_client("c"));
    }

    #[test]
    fn test_display_matches_dump_layout() {
        let s = station(3, "Song", &["addrA"]);
        assert_eq!(s.to_string(), "Station 3 [\"Song\"] clients:\n\t - addrA\n");
    }
}
