//! Resolves an archive's password by ordered guessing.
//!
//! Attempts run strictly in sequence: no password, then the caller's
//! password (if any), then the dictionary from index 0. The first attempt
//! the codec accepts wins, so the reported password is reproducible for a
//! given archive and dictionary.

use crate::models::archive::ArchiveEntry;
use crate::services::archive_codec::{ArchiveCodec, DecodeError};
use std::{fs, io, path::Path, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Passwords commonly attached to scanned-book archives.
const BUILTIN_PASSWORDS: &[&str] = &[
    "123456",
    "duxiu",
    "www.duxiu.com",
    "duxiu.com",
    "sslibrary",
    "ssreader",
    "www.sslibrary.com",
    "chaoxing",
    "www.chaoxing.com",
    "superstar",
    "pdg",
    "pdg2pic",
    "uvz",
    "book",
    "ebook",
    "pdf",
    "zip",
    "0",
    "1",
    "000000",
    "111111",
    "12345",
    "1234567",
    "12345678",
    "123456789",
    "1234567890",
    "654321",
    "666666",
    "888888",
    "123123",
    "abc123",
    "password",
    "admin",
    "qwerty",
    "a123456",
    "www.readfree.net",
    "readfree",
    "www.bookschina.com",
    "sobook",
    "www.sobooks.cc",
];

/// Immutable, ordered password list shared by every resolution.
#[derive(Debug, Clone)]
pub struct PasswordDictionary {
    passwords: Arc<[String]>,
}

impl PasswordDictionary {
    pub fn new(passwords: impl IntoIterator<Item = String>) -> Self {
        Self {
            passwords: passwords.into_iter().collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_PASSWORDS.iter().map(|p| p.to_string()))
    }

    /// One password per line. Blank lines and lines starting with `#` are
    /// skipped; other lines are taken verbatim apart from the line ending.
    pub fn parse(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        )
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.passwords.iter().map(String::as_str)
    }
}

/// Cleartext entries plus how they were obtained.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entries: Vec<ArchiveEntry>,
    pub password_used: Option<String>,
    pub attempts: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Every attempt failed; the caller may prompt for a password and retry.
    #[error("archive could not be decrypted after {attempts} attempts")]
    ArchiveUnreadable {
        attempts: usize,
        needs_manual_password: bool,
    },
    /// The bytes are not a readable archive; no password will help.
    #[error("archive is malformed: {0}")]
    ArchiveMalformed(String),
}

#[derive(Clone)]
pub struct PasswordResolver {
    codec: Arc<dyn ArchiveCodec>,
    dictionary: PasswordDictionary,
}

impl PasswordResolver {
    pub fn new(codec: Arc<dyn ArchiveCodec>, dictionary: PasswordDictionary) -> Self {
        Self { codec, dictionary }
    }

    /// Decode `archive`, guessing the password if needed.
    ///
    /// A blank `user_password` counts as none.
    pub fn resolve(
        &self,
        archive: &[u8],
        user_password: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let mut attempts = 0;

        attempts += 1;
        match self.codec.decode(archive, None) {
            Ok(entries) => {
                debug!("archive opened without a password");
                return Ok(Resolution {
                    entries,
                    password_used: None,
                    attempts,
                });
            }
            Err(DecodeError::Malformed(reason)) => {
                return Err(ResolveError::ArchiveMalformed(reason));
            }
            Err(err) => debug!(error = %err, "archive needs a password"),
        }

        let user_password = user_password.filter(|p| !p.trim().is_empty());
        if let Some(password) = user_password {
            attempts += 1;
            match self.codec.decode(archive, Some(password.as_bytes())) {
                Ok(entries) => {
                    info!("archive opened with the supplied password");
                    return Ok(Resolution {
                        entries,
                        password_used: Some(password.to_string()),
                        attempts,
                    });
                }
                Err(err) => debug!(error = %err, "supplied password rejected"),
            }
        }

        for (index, password) in self.dictionary.iter().enumerate() {
            if Some(password) == user_password {
                continue;
            }
            attempts += 1;
            match self.codec.decode(archive, Some(password.as_bytes())) {
                Ok(entries) => {
                    info!(
                        password,
                        position = index + 1,
                        dictionary = self.dictionary.len(),
                        "archive decrypted from dictionary"
                    );
                    return Ok(Resolution {
                        entries,
                        password_used: Some(password.to_string()),
                        attempts,
                    });
                }
                Err(_) if index > 0 && index % 10 == 0 => {
                    debug!(tried = index, "still searching dictionary");
                }
                Err(_) => {}
            }
        }

        warn!(attempts, "password search exhausted");
        Err(ResolveError::ArchiveUnreadable {
            attempts,
            needs_manual_password: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::archive_codec::{ZipCodec, fixtures::zip};
    use std::sync::Mutex;

    /// Accepts exactly one password and records every attempt.
    struct ScriptedCodec {
        accepts: Option<&'static str>,
        malformed: bool,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedCodec {
        fn accepting(accepts: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                accepts,
                malformed: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ArchiveCodec for ScriptedCodec {
        fn decode(
            &self,
            _bytes: &[u8],
            password: Option<&[u8]>,
        ) -> Result<Vec<ArchiveEntry>, DecodeError> {
            let password = password.map(|p| String::from_utf8_lossy(p).into_owned());
            self.seen.lock().unwrap().push(password.clone());
            if self.malformed {
                return Err(DecodeError::Malformed("bad".into()));
            }
            match (password.as_deref(), self.accepts) {
                (None, None) => Ok(vec![ArchiveEntry::new("1.jpg", vec![1])]),
                (Some(p), Some(a)) if p == a => Ok(vec![ArchiveEntry::new("1.jpg", vec![1])]),
                (None, Some(_)) => Err(DecodeError::PasswordRequired),
                _ => Err(DecodeError::Rejected("nope".into())),
            }
        }
    }

    fn dictionary(words: &[&str]) -> PasswordDictionary {
        PasswordDictionary::new(words.iter().map(|w| w.to_string()))
    }

    #[test]
    fn unencrypted_archive_needs_one_attempt() {
        let codec = ScriptedCodec::accepting(None);
        let resolver = PasswordResolver::new(codec.clone(), dictionary(&["a", "b"]));
        let resolution = resolver.resolve(b"zip", Some("user")).unwrap();
        assert_eq!(resolution.password_used, None);
        assert_eq!(resolution.attempts, 1);
        assert_eq!(codec.seen(), vec![None]);
    }

    #[test]
    fn tries_user_password_before_dictionary() {
        let codec = ScriptedCodec::accepting(Some("user"));
        let resolver = PasswordResolver::new(codec.clone(), dictionary(&["a", "user"]));
        let resolution = resolver.resolve(b"zip", Some("user")).unwrap();
        assert_eq!(resolution.password_used.as_deref(), Some("user"));
        assert_eq!(codec.seen(), vec![None, Some("user".to_string())]);
    }

    #[test]
    fn dictionary_is_walked_in_order_and_stops_at_first_success() {
        let codec = ScriptedCodec::accepting(Some("c"));
        let resolver = PasswordResolver::new(codec.clone(), dictionary(&["a", "b", "c", "d"]));
        let resolution = resolver.resolve(b"zip", Some("   ")).unwrap();
        assert_eq!(resolution.password_used.as_deref(), Some("c"));
        assert_eq!(resolution.attempts, 4);
        assert_eq!(
            codec.seen(),
            vec![None, Some("a".into()), Some("b".into()), Some("c".into())]
        );
    }

    #[test]
    fn exhaustion_asks_for_manual_password() {
        let codec = ScriptedCodec::accepting(Some("secret"));
        let resolver = PasswordResolver::new(codec.clone(), dictionary(&["a", "b", "wrong"]));
        let err = resolver.resolve(b"zip", Some("wrong")).unwrap_err();
        // the user's password is not re-tried from the dictionary
        assert_eq!(
            err,
            ResolveError::ArchiveUnreadable {
                attempts: 4,
                needs_manual_password: true
            }
        );

        let resolution = resolver.resolve(b"zip", Some("secret")).unwrap();
        assert_eq!(resolution.password_used.as_deref(), Some("secret"));
    }

    #[test]
    fn malformed_archive_stops_immediately() {
        let codec = Arc::new(ScriptedCodec {
            accepts: None,
            malformed: true,
            seen: Mutex::new(Vec::new()),
        });
        let resolver = PasswordResolver::new(codec.clone(), dictionary(&["a", "b"]));
        let err = resolver.resolve(b"zip", None).unwrap_err();
        assert!(matches!(err, ResolveError::ArchiveMalformed(_)));
        assert_eq!(codec.seen().len(), 1);
    }

    #[test]
    fn resolution_is_deterministic_on_real_archives() {
        let archive = zip(&[("001.jpg", b"page".as_slice())], Some("ssreader"));
        let resolver = PasswordResolver::new(Arc::new(ZipCodec::default()), PasswordDictionary::builtin());
        let first = resolver.resolve(&archive, None).unwrap();
        for _ in 0..3 {
            let again = resolver.resolve(&archive, None).unwrap();
            assert_eq!(again.password_used, first.password_used);
            assert_eq!(again.attempts, first.attempts);
        }
        assert_eq!(first.password_used.as_deref(), Some("ssreader"));
        assert_eq!(first.entries[0].data, b"page");
    }

    #[test]
    fn dictionary_file_format() {
        let dict = PasswordDictionary::parse("# comment\nalpha\r\n\n  \nbeta gamma\n#x\n");
        assert_eq!(dict.iter().collect::<Vec<_>>(), vec!["alpha", "beta gamma"]);
        assert!(PasswordDictionary::builtin().len() > 10);
    }
}
