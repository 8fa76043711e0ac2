use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(sev_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(base) = sev_home {
        return Some(base.join(".env"));
    }
    Some(home_dir?.join(".slack-export-viewer/.env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(env::var_os("SEV_HOME").map(PathBuf::from), dirs::home_dir());

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_prefers_sev_home() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/viewer")),
            Some(PathBuf::from("/home/alice")),
        );
        assert_eq!(got, Some(PathBuf::from("/srv/viewer/.env")));
    }

    #[test]
    fn fallback_uses_home_when_sev_home_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/alice")));
        assert_eq!(
            got,
            Some(PathBuf::from("/home/alice/.slack-export-viewer/.env"))
        );
    }

    #[test]
    fn fallback_is_none_without_any_base() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
