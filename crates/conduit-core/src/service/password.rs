//! Password of the application user.

use rand::distributions::Alphanumeric;
use rand::Rng;

use super::running_info::write_private_file;
use crate::config::InstallLayout;
use crate::constants::ENV_DATABASE_PASSWORD;
use crate::error::{FsResultExt, Result};

/// Resolves the password: environment first, then the password file, else a
/// freshly generated one that is persisted for the next start.
pub fn resolve_password(layout: &InstallLayout) -> Result<String> {
    if let Ok(password) = std::env::var(ENV_DATABASE_PASSWORD) {
        if !password.is_empty() {
            return Ok(password);
        }
    }

    let path = layout.password_file();
    match std::fs::read_to_string(&path) {
        Ok(contents) if !contents.trim().is_empty() => return Ok(contents.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).fs_context(&path),
    }

    let password = generate_password();
    write_private_file(&path, password.as_bytes())?;
    log::info!("generated database password at {}", path.display());
    Ok(password)
}

/// Three dash-separated groups of four lowercase alphanumerics.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..3)
        .map(|_| {
            (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(4)
                .map(|b| char::from(b).to_ascii_lowercase())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}
