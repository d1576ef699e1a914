//! Route mode classification
//!
//! Decides, per request, what kind of content to produce. Exactly one
//! outcome applies to any combination of path shape and query flags.

/// The mutually exclusive content-serving modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    MainPage,
    Favicon,
    BrowseDirectory,
    BrowseFile,
    MetaDirectory,
    MetaFile,
    Module,
    File,
}

impl std::fmt::Display for RouteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RouteMode::MainPage => "main-page",
            RouteMode::Favicon => "favicon",
            RouteMode::BrowseDirectory => "browse-directory",
            RouteMode::BrowseFile => "browse-file",
            RouteMode::MetaDirectory => "meta-directory",
            RouteMode::MetaFile => "meta-file",
            RouteMode::Module => "module",
            RouteMode::File => "file",
        };
        write!(f, "{name}")
    }
}

/// Classification outcome: either a terminal mode, or the one non-terminal
/// case — a flagless directory URL under the generic group, which redirects
/// to its `/browse/` equivalent instead of being dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Mode(RouteMode),
    RedirectToBrowse(String),
}

/// Classify a request by path shape and query flags.
///
/// Priority order: root, favicon, browse prefix, the redirect case, then
/// the flag-driven generic modes. `meta` wins over `module` when both are
/// present.
pub fn classify(path: &str, meta: bool, module: bool) -> Dispatch {
    if path == "/" && !meta && !module {
        return Dispatch::Mode(RouteMode::MainPage);
    }
    if path == "/favicon.ico" || path == "/favicon.svg" {
        return Dispatch::Mode(RouteMode::Favicon);
    }
    if path == "/browse" || path.starts_with("/browse/") {
        return Dispatch::Mode(if path.ends_with('/') {
            RouteMode::BrowseDirectory
        } else {
            RouteMode::BrowseFile
        });
    }
    if !meta && !module && path.ends_with('/') {
        // Send old trailing-slash URLs to the browse UI.
        return Dispatch::RedirectToBrowse(format!("/browse{path}"));
    }
    if meta {
        return Dispatch::Mode(if path.ends_with('/') {
            RouteMode::MetaDirectory
        } else {
            RouteMode::MetaFile
        });
    }
    if module {
        return Dispatch::Mode(RouteMode::Module);
    }
    Dispatch::Mode(RouteMode::File)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_main_page() {
        assert_eq!(classify("/", false, false), Dispatch::Mode(RouteMode::MainPage));
    }

    #[test]
    fn favicon_paths_are_favicon() {
        assert_eq!(
            classify("/favicon.ico", false, false),
            Dispatch::Mode(RouteMode::Favicon)
        );
        assert_eq!(
            classify("/favicon.svg", false, false),
            Dispatch::Mode(RouteMode::Favicon)
        );
    }

    #[test]
    fn browse_directory_on_trailing_slash() {
        assert_eq!(
            classify("/browse/lodash@4.17.21/", false, false),
            Dispatch::Mode(RouteMode::BrowseDirectory)
        );
    }

    #[test]
    fn browse_file_without_trailing_slash() {
        assert_eq!(
            classify("/browse/lodash@4.17.21/package.json", false, false),
            Dispatch::Mode(RouteMode::BrowseFile)
        );
    }

    #[test]
    fn flagless_directory_redirects_to_browse() {
        assert_eq!(
            classify("/lodash@4.17.21/", false, false),
            Dispatch::RedirectToBrowse("/browse/lodash@4.17.21/".to_string())
        );
    }

    #[test]
    fn meta_file() {
        assert_eq!(
            classify("/lodash@4.17.21/package.json", true, false),
            Dispatch::Mode(RouteMode::MetaFile)
        );
    }

    #[test]
    fn meta_directory() {
        assert_eq!(
            classify("/lodash@4.17.21/", true, false),
            Dispatch::Mode(RouteMode::MetaDirectory)
        );
    }

    #[test]
    fn module_file() {
        assert_eq!(
            classify("/lodash@4.17.21/index.js", false, true),
            Dispatch::Mode(RouteMode::Module)
        );
    }

    #[test]
    fn plain_file() {
        assert_eq!(
            classify("/lodash@4.17.21/package.json", false, false),
            Dispatch::Mode(RouteMode::File)
        );
    }

    #[test]
    fn meta_wins_over_module() {
        assert_eq!(
            classify("/pkg/file.js", true, true),
            Dispatch::Mode(RouteMode::MetaFile)
        );
        assert_eq!(
            classify("/pkg/", true, true),
            Dispatch::Mode(RouteMode::MetaDirectory)
        );
    }

    #[test]
    fn classification_is_total_over_the_shape_and_flag_grid() {
        let paths = ["/", "/browse/pkg/", "/pkg/file", "/pkg/file/"];
        let flags = [(false, false), (true, false), (false, true), (true, true)];
        for path in paths {
            for (meta, module) in flags {
                // Every combination classifies to exactly one outcome.
                match classify(path, meta, module) {
                    Dispatch::Mode(_) | Dispatch::RedirectToBrowse(_) => {}
                }
            }
        }
    }

    #[test]
    fn root_with_flags_falls_through_to_generic_rules() {
        // "/" with a disambiguating query is no longer the main page.
        assert_eq!(classify("/", true, false), Dispatch::Mode(RouteMode::MetaDirectory));
        assert_eq!(classify("/", false, true), Dispatch::Mode(RouteMode::Module));
    }

    #[test]
    fn mode_display_names() {
        assert_eq!(RouteMode::BrowseDirectory.to_string(), "browse-directory");
        assert_eq!(RouteMode::MetaFile.to_string(), "meta-file");
        assert_eq!(RouteMode::File.to_string(), "file");
    }
}
