//! Host key verification against ~/.ssh/known_hosts
//!
//! Read-only: entries are loaded once and consulted during the handshake.
//! Nothing is written back; registering a host stays the user's call
//! (ssh-keyscan, or a first interactive ssh).

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches a known_hosts entry
    Verified,
    /// Host not present in known_hosts
    Unknown { fingerprint: String },
    /// Key differs from the known_hosts entry (potential MITM)
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

/// Entry in known_hosts: key type plus base64 key blob
#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

/// In-memory view of a known_hosts file
pub struct KnownHosts {
    /// host (or `[host]:port`) -> keys, multiple key types per host
    hosts: HashMap<String, Vec<HostKeyEntry>>,
}

impl KnownHosts {
    /// Load from `~/.ssh/known_hosts`
    pub fn open_default() -> Self {
        let path = dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from("~/.ssh/known_hosts"));
        Self::with_path(&path)
    }

    /// Load from a specific file. A missing file yields an empty store.
    pub fn with_path(path: &Path) -> Self {
        let mut store = Self {
            hosts: HashMap::new(),
        };
        if let Err(e) = store.load(path) {
            warn!("Failed to load {}: {}", path.display(), e);
        }
        store
    }

    fn load(&mut self, path: &Path) -> std::io::Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias...] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                // Hashed hostnames (|1|...) cannot be matched without the salt
                if hostname.starts_with('|') {
                    continue;
                }
                self.hosts
                    .entry(hostname.to_lowercase())
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        debug!(
            "Loaded {} known host entries ({} unique hosts)",
            entry_count,
            self.hosts.len()
        );
        Ok(())
    }

    /// Lookup key for a host:port pair. Port 22 uses the bare hostname,
    /// anything else the `[host]:port` form, mirroring the file format.
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA256 fingerprint of a public key, in the OpenSSH display form
    pub fn fingerprint(key: &PublicKey) -> String {
        let key_bytes = key.public_key_bytes();
        let mut hasher = Sha256::new();
        hasher.update(&key_bytes);
        let hash = hasher.finalize();
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    /// Verify a host's public key
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let actual_key_b64 = BASE64.encode(key.public_key_bytes());
        let actual_key_type = key.algorithm().as_str().to_string();
        let fingerprint = Self::fingerprint(key);

        // Any matching entry verifies the key; a mismatch only counts when
        // no same-type entry matches
        let check_entries = |entries: &Vec<HostKeyEntry>| -> Option<HostKeyVerification> {
            let mut mismatch = None;
            for entry in entries {
                if entry.key_type != actual_key_type {
                    continue;
                }
                if entry.key_data == actual_key_b64 {
                    return Some(HostKeyVerification::Verified);
                }
                if mismatch.is_none() {
                    mismatch = Some(entry);
                }
            }
            // None here means the host is known but has no entry of this type
            mismatch.map(|entry| HostKeyVerification::Changed {
                expected_fingerprint: Self::fingerprint_of_blob(&entry.key_data),
                actual_fingerprint: fingerprint.clone(),
            })
        };

        // Exact form first, then the bare hostname
        for candidate in [lookup_key, host.to_lowercase()] {
            if let Some(entries) = self.hosts.get(&candidate) {
                if let Some(result) = check_entries(entries) {
                    return result;
                }
                debug!(
                    "Host {} known but no {} key stored, treating as unknown",
                    candidate, actual_key_type
                );
                return HostKeyVerification::Unknown { fingerprint };
            }
        }

        debug!("Unknown host: {}", Self::make_key(host, port));
        HostKeyVerification::Unknown { fingerprint }
    }

    /// Fingerprint of a stored base64 key blob
    fn fingerprint_of_blob(stored_b64: &str) -> String {
        match BASE64.decode(stored_b64) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let hash = hasher.finalize();
                format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
            }
            Err(_) => "unknown".to_string(),
        }
    }
}
