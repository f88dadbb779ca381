//! Country lookup for config servers using MMDB

use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Resolves the country for config servers given as IP literals.
/// Hostname servers are skipped rather than resolved; the catalog only
/// carries a coarse geography tag and is rebuilt often.
pub struct GeoResolver {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoResolver {
    /// Create a new GeoResolver from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// ISO 3166-1 alpha-2 country code for a server string, if it is an
    /// IP literal present in the database
    pub fn country(&self, server: &str) -> Option<String> {
        let ip: IpAddr = server.parse().ok()?;
        self.country_of_ip(ip).ok().flatten()
    }

    /// Country code for an IpAddr
    pub fn country_of_ip(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup_result = self.reader.lookup(ip)?;

        // Decode the Country data from the lookup result
        let record: Option<geoip2::Country> = lookup_result.decode()?;

        Ok(record.and_then(|record| record.country.iso_code.map(String::from)))
    }
}

impl Clone for GeoResolver {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
