mod github;
mod pling;

pub use github::GithubRelease;
pub use pling::PlingFiles;

use crate::checker::Registry;
use crate::error::CheckerError;

/// Every source this build knows about.
pub fn registry() -> Result<Registry, CheckerError> {
    let mut registry = Registry::new();

    registry.register(|| {
        GithubRelease::new("Magisk", "Magisk", "topjohnwu/Magisk").asset(".apk")
    })?;
    registry.register(|| {
        GithubRelease::new("KernelSU", "KernelSU", "tiann/KernelSU")
            .asset(".apk")
            .newer_date_only()
    })?;
    registry.register(|| {
        GithubRelease::new("Lsposed", "LSPosed", "LSPosed/LSPosed").asset("release")
    })?;

    registry.register(|| PlingFiles::new("AosipDf3", "AOSiP DerpFest (By srfarias)", 1338683))?;
    registry.register(|| {
        PlingFiles::new("LineageU1", "Lineage OS (Unofficial By srfarias)", 1336266)
    })?;
    registry.register(|| {
        PlingFiles::new("LineageU1Gapps", "Lineage OS GApps (Unofficial By srfarias)", 1336266)
            .matching("gapps")
    })?;

    Ok(registry)
}
