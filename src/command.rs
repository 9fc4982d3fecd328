use crate::options::SyncOptions;

/// Turns an option set into the argument list handed to the sync tool.
/// Sources and the destination are appended later, per item.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn build(&self, options: &SyncOptions) -> Vec<String> {
        let mut args: Vec<&str> = Vec::new();

        if options.archive {
            // -a already covers -rlptgoD
            args.push("-a");
        } else {
            args.push("-rltD");
            if options.preserve_permissions {
                args.push("-pgo");
            }
            args.extend(["--atimes", "--crtimes", "--omit-dir-times"]);
        }

        if options.verbose {
            args.push("-v");
        }
        if options.compress {
            args.push("-z");
        }
        if options.human_readable {
            args.push("-h");
        }
        if options.progress {
            args.push("--progress");
        } else {
            args.push("--info=progress2");
        }
        if options.delete {
            args.push("--delete");
        }
        if options.dry_run {
            args.push("-n");
        }

        let mut unique: Vec<String> = Vec::with_capacity(args.len());
        for arg in args {
            if !unique.iter().any(|seen| seen == arg) {
                unique.push(arg.to_string());
            }
        }
        unique
    }
}
