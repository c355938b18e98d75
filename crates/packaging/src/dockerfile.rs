use crate::stages::{ApplicationPlan, DependencyPlan};
use botpack_models::TIMEZONE_VAR;

pub const LABEL_STAGE: &str = "io.botpack.stage";
pub const LABEL_MANIFEST_SHA256: &str = "io.botpack.manifest-sha256";
pub const LABEL_SOURCE_SHA256: &str = "io.botpack.source-sha256";
pub const LABEL_DEPENDENCY_IMAGE: &str = "io.botpack.dependency-image";

/// Stage 1: pinned runtime, build flags, then only the manifest and the
/// dependency install. Nothing from the source tree is referenced here.
pub fn dependency_dockerfile(plan: &DependencyPlan) -> String {
    let flags: String = plan
        .options
        .env()
        .iter()
        .map(|(name, value)| format!("ENV {name}={value}\n"))
        .collect();
    let system = if plan.system_packages.is_empty() {
        String::new()
    } else {
        format!(
            "RUN apt-get update \\\n    && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*\n",
            plan.system_packages.join(" ")
        )
    };
    let no_cache = if plan.options.no_package_cache {
        " --no-cache-dir"
    } else {
        ""
    };

    format!(
        r#"FROM {base}
{flags}WORKDIR {workdir}
{system}COPY {manifest} ./
RUN pip install{no_cache} -r {manifest}
LABEL {LABEL_STAGE}="dependencies" {LABEL_MANIFEST_SHA256}="{manifest_sha256}"
"#,
        base = plan.base_image,
        workdir = plan.workdir,
        manifest = plan.manifest_file,
        manifest_sha256 = plan.manifest_sha256,
    )
}

/// Stage 2: layered on the dependency image, copies the source tree and
/// declares the runtime contract.
pub fn application_dockerfile(plan: &ApplicationPlan) -> String {
    let env: String = plan
        .env_defaults
        .defaults()
        .iter()
        .map(|(name, value)| format!("ENV {name}={}\n", quote_env(value)))
        .collect();

    format!(
        r#"FROM {dependency_tag}
WORKDIR {workdir}
COPY . ./
# {TIMEZONE_VAR} is resolved when a container is started; override with -e {TIMEZONE_VAR}=<zone>
{env}LABEL {LABEL_STAGE}="application" {LABEL_SOURCE_SHA256}="{source_sha256}" {LABEL_DEPENDENCY_IMAGE}="{dependency_tag}"
CMD {cmd}
"#,
        dependency_tag = plan.dependency_tag,
        workdir = plan.workdir,
        source_sha256 = plan.source_sha256,
        cmd = plan.entrypoint.exec_form(),
    )
}

fn quote_env(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/_-.:+".contains(c))
    {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}
