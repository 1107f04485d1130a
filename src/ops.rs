//! File-level operations behind the `kilid` binary
//!
//! Every output file is written to a temporary file in the target directory
//! and renamed into place, so a failed operation never leaves a partial key
//! or payload behind.

use crate::crypto::armor::{self, ArmorKind};
use crate::crypto::CryptoError;
use crate::identity::{self, codec, SeedPhrase, UserId};
use crate::{KilidConfig, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

pub const PUBLIC_KEY_FILE: &str = "public.asc";
pub const PRIVATE_KEY_FILE: &str = "private.asc";
pub const MNEMONIC_FILE: &str = "mnemonic.txt";

/// Where the seed for a new identity comes from
pub enum SeedSource {
    /// A freshly generated phrase, saved next to the keys
    Fresh { word_count: usize },
    /// An existing phrase, e.g. when recovering keys
    Phrase(Zeroizing<String>),
}

pub struct GenerateRequest {
    pub user_id: UserId,
    pub seed: SeedSource,
    pub passphrase: Option<Zeroizing<String>>,
}

/// Outcome of an operation, for display
#[derive(Debug, Clone)]
pub struct OperationReport {
    pub message: String,
    pub fingerprint: Option<String>,
    pub files: Vec<PathBuf>,
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Write `contents` to `path` through a temp file and rename.
/// Non-private files are made world-readable on unix.
fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    let mut file = NamedTempFile::new_in(parent_dir(path))?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    set_mode(file.path(), private)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, private: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if private { 0o600 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _private: bool) -> std::io::Result<()> {
    Ok(())
}

/// Generate an identity and save its keys into `config.output_dir`
pub fn generate_and_save(
    config: &KilidConfig,
    request: GenerateRequest,
) -> Result<OperationReport> {
    let (phrase, fresh) = match &request.seed {
        SeedSource::Fresh { word_count } => (SeedPhrase::generate(*word_count)?, true),
        SeedSource::Phrase(text) => (SeedPhrase::from_phrase(text)?, false),
    };
    let passphrase = request.passphrase.as_ref().map(|p| p.as_str()).unwrap_or("");
    let seed = phrase.to_seed(passphrase);

    let identity = identity::generate(&request.user_id, seed.as_slice(), &config.key_params)?;
    let exported = identity.export()?;
    let fingerprint = identity.fingerprint();

    let dir = Path::new(&config.output_dir);
    fs::create_dir_all(dir)?;

    let mut files = vec![dir.join(PUBLIC_KEY_FILE), dir.join(PRIVATE_KEY_FILE)];
    write_atomic(&files[0], exported.public.as_bytes(), false)?;
    write_atomic(&files[1], exported.private.as_bytes(), true)?;

    if fresh {
        let path = dir.join(MNEMONIC_FILE);
        let text = Zeroizing::new(format!("{}\n", phrase.phrase().as_str()));
        write_atomic(&path, text.as_bytes(), true)?;
        files.push(path);
    }

    tracing::info!("Saved identity {} to {}", fingerprint, dir.display());

    let mut message = format!("Generated key {} for {}", fingerprint, identity.user_id());
    if fresh {
        message.push_str(&format!(
            "\nSeed phrase written to {}. Store it offline; it recreates the private key.",
            dir.join(MNEMONIC_FILE).display()
        ));
    }

    Ok(OperationReport {
        message,
        fingerprint: Some(fingerprint.to_string()),
        files,
    })
}

/// Encrypt `input` to the first key in `public_key_path`
pub fn encrypt_file(
    config: &KilidConfig,
    public_key_path: &Path,
    input: &Path,
    output: &Path,
) -> Result<OperationReport> {
    let recipients = codec::import_public_ring(&fs::read_to_string(public_key_path)?)?;

    if fs::metadata(input)?.len() == 0 {
        tracing::warn!("Refusing to encrypt empty file {}", input.display());
        return Err(CryptoError::EmptyInput.into());
    }

    let envelope = config.envelope();
    let reader = BufReader::new(File::open(input)?);
    let mut tmp = NamedTempFile::new_in(parent_dir(output))?;

    let bytes = if config.armor {
        // armor needs the whole envelope for its checksum line
        let mut sealed = Vec::new();
        let bytes = envelope.encrypt_stream(&recipients, reader, &mut sealed)?;
        tmp.write_all(armor::encode(ArmorKind::Message, &sealed).as_bytes())?;
        bytes
    } else {
        envelope.encrypt_stream(&recipients, reader, BufWriter::new(tmp.as_file_mut()))?
    };

    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), false)?;
    tmp.persist(output).map_err(|e| e.error)?;

    let recipient = recipients.first().map(|k| k.fingerprint().to_string());
    tracing::info!("Encrypted {} bytes to {}", bytes, output.display());

    Ok(OperationReport {
        message: format!(
            "Encrypted {} ({} bytes) to {}",
            input.display(),
            bytes,
            output.display()
        ),
        fingerprint: recipient,
        files: vec![output.to_path_buf()],
    })
}

/// Decrypt `input`, binary or armored, with the keys in `private_key_path`
pub fn decrypt_file(
    config: &KilidConfig,
    private_key_path: &Path,
    input: &Path,
    output: &Path,
) -> Result<OperationReport> {
    let key_text = Zeroizing::new(fs::read_to_string(private_key_path)?);
    let keys = codec::import_private_ring(&key_text)?;

    let envelope = config.envelope();
    let mut reader = BufReader::new(File::open(input)?);
    let armored = armor::is_armored(reader.fill_buf()?);
    let mut tmp = NamedTempFile::new_in(parent_dir(output))?;

    let bytes = if armored {
        // held in memory, unlike the binary path
        let mut text = Vec::new();
        reader.read_to_end(&mut text)?;
        let plaintext = Zeroizing::new(envelope.decrypt(&keys, &text)?);
        tmp.write_all(&plaintext)?;
        plaintext.len() as u64
    } else {
        envelope.decrypt_stream(&keys, reader, BufWriter::new(tmp.as_file_mut()))?
    };

    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), true)?;
    tmp.persist(output).map_err(|e| e.error)?;

    tracing::info!("Decrypted {} bytes to {}", bytes, output.display());

    Ok(OperationReport {
        message: format!(
            "Decrypted {} ({} bytes) to {}",
            input.display(),
            bytes,
            output.display()
        ),
        fingerprint: None,
        files: vec![output.to_path_buf()],
    })
}
