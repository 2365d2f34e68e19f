use std::path::Path;

use tokio::fs;

use crate::error::Result;

/// Write the `pre-receive` and `post-receive` scripts into a bare repo's
/// hooks directory. Each script execs this binary in hook mode; hook stdin
/// passes through unmodified.
pub async fn install_hooks(repo_path: &Path, binary_path: &Path) -> Result<()> {
    let hooks_dir = repo_path.join("hooks");
    fs::create_dir_all(&hooks_dir).await?;

    let pre_receive = format!(
        "#!/bin/sh\n\
         # Origin pre-receive hook — enforces SSH commit signing.\n\
         exec \"{}\" hook pre-receive\n",
        binary_path.display()
    );
    write_hook(&hooks_dir.join("pre-receive"), &pre_receive).await?;

    let post_receive = format!(
        "#!/bin/sh\n\
         # Origin post-receive hook — triggers webhooks.\n\
         exec \"{}\" hook post-receive\n",
        binary_path.display()
    );
    write_hook(&hooks_dir.join("post-receive"), &post_receive).await?;

    Ok(())
}

async fn write_hook(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn installs_executable_scripts() {
        let dir = tempfile::tempdir().unwrap();
        install_hooks(dir.path(), Path::new("/usr/local/bin/origin"))
            .await
            .unwrap();

        for name in ["pre-receive", "post-receive"] {
            let path = dir.path().join("hooks").join(name);
            let contents = std::fs::read_to_string(&path).unwrap();
            assert!(contents.starts_with("#!/bin/sh\n"));
            assert!(contents.contains(&format!("exec \"/usr/local/bin/origin\" hook {name}")));

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = std::fs::metadata(&path).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o755);
            }
        }
    }
}
