use derive_builder::Builder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::collaborators::Game;

/// Everything needed to spawn a game's executable
#[derive(Default, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct LaunchSpec {
    pub executable: PathBuf,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn builder() -> LaunchSpecBuilder {
        LaunchSpecBuilder::default()
    }

    /// Launch description for a catalog entry. The working directory falls
    /// back to the folder containing the executable.
    pub fn for_game(game: &Game) -> Self {
        let working_directory = game
            .working_directory
            .clone()
            .or_else(|| game.launch_path.parent().map(Path::to_path_buf))
            .filter(|dir| !dir.as_os_str().is_empty());

        Self {
            executable: game.launch_path.clone(),
            args: game.launch_args.clone(),
            env: HashMap::new(),
            working_directory,
        }
    }

    /// Executable file name as the process table reports it
    pub fn executable_name(&self) -> String {
        self.executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.to_string_lossy().into_owned())
    }
}

impl LaunchSpecBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }
}
