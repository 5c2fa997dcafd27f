//! AndroidManifest.xml generation.
//!
//! The manifest is synthesized from the project descriptor: package id,
//! versioning, the effective minimum API, every declared permission, and
//! the launcher activity. Companion builds add the connectivity
//! permissions the interpreter needs to reach the editor.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::context::BuildContext;
use crate::task::{Task, TaskError, TaskResult};
use crate::tasks::icon::has_launcher_icon;

/// API level the generated app targets.
const TARGET_SDK: u32 = 33;

const COMPANION_PERMISSIONS: &[&str] = &[
    "android.permission.ACCESS_NETWORK_STATE",
    "android.permission.ACCESS_WIFI_STATE",
];

#[derive(Debug)]
pub struct CreateManifest;

impl Task for CreateManifest {
    fn name(&self) -> &'static str {
        "create-manifest"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let manifest = render_manifest(context);
        let path = context.paths.manifest_path();
        std::fs::write(&path, manifest)
            .map_err(|e| TaskError::with_cause("could not write AndroidManifest.xml", e))?;
        context
            .reporter
            .info(&format!("wrote {}", path.display()));
        Ok(())
    }
}

fn render_manifest(context: &BuildContext) -> String {
    let project = &context.project;
    let min_api = context.effective_min_api();

    // INTERNET is unconditional; every component runtime build assumes it.
    let mut permissions: BTreeSet<String> = project.permissions.iter().cloned().collect();
    permissions.insert("android.permission.INTERNET".to_string());
    if context.for_companion() {
        permissions.extend(COMPANION_PERMISSIONS.iter().map(ToString::to_string));
    }

    let mut xml = String::new();
    let _ = writeln!(xml, r#"<?xml version="1.0" encoding="utf-8"?>"#);
    let _ = writeln!(
        xml,
        r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android""#
    );
    let _ = writeln!(xml, r#"    package="{}""#, escape_xml(&project.package));
    let _ = writeln!(
        xml,
        r#"    android:versionCode="{}""#,
        project.version_code
    );
    let _ = writeln!(
        xml,
        r#"    android:versionName="{}">"#,
        escape_xml(&project.version_name)
    );
    let _ = writeln!(
        xml,
        r#"  <uses-sdk android:minSdkVersion="{min_api}" android:targetSdkVersion="{TARGET_SDK}" />"#
    );
    for permission in &permissions {
        let _ = writeln!(
            xml,
            r#"  <uses-permission android:name="{}" />"#,
            escape_xml(permission)
        );
    }

    let icon_attr = if has_launcher_icon(context) {
        r#" android:icon="@drawable/ic_launcher""#
    } else {
        ""
    };
    let _ = writeln!(
        xml,
        r#"  <application android:label="{}"{icon_attr}>"#,
        escape_xml(&project.name)
    );
    let _ = writeln!(
        xml,
        r#"    <activity android:name="{}" android:exported="true">"#,
        escape_xml(&project.main_class)
    );
    let _ = writeln!(xml, r#"      <intent-filter>"#);
    let _ = writeln!(
        xml,
        r#"        <action android:name="android.intent.action.MAIN" />"#
    );
    let _ = writeln!(
        xml,
        r#"        <category android:name="android.intent.category.LAUNCHER" />"#
    );
    let _ = writeln!(xml, r#"      </intent-filter>"#);
    let _ = writeln!(xml, r#"    </activity>"#);
    let _ = writeln!(xml, r#"  </application>"#);
    let _ = writeln!(xml, r#"</manifest>"#);
    xml
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use tempfile::tempdir;

    #[test]
    fn writes_manifest_with_declared_permissions_once() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        context.project.min_api = Some(23);
        context.project.permissions = vec![
            "android.permission.CAMERA".to_string(),
            "android.permission.INTERNET".to_string(),
        ];

        CreateManifest.execute(&mut context).unwrap();

        let text = std::fs::read_to_string(context.paths.manifest_path()).unwrap();
        assert!(text.contains(r#"package="com.example.paint""#));
        assert!(text.contains(r#"android:minSdkVersion="23""#));
        assert!(text.contains("android.permission.CAMERA"));
        assert_eq!(text.matches("android.permission.INTERNET").count(), 1);
        assert!(text.contains(r#"android:name="com.example.paint.Screen1""#));
    }

    #[test]
    fn companion_adds_connectivity_permissions() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        context.config.for_companion = true;

        let text = render_manifest(&context);
        assert!(text.contains("android.permission.ACCESS_WIFI_STATE"));
        // companion is pinned below 21
        assert!(text.contains(r#"android:minSdkVersion="20""#));
    }

    #[test]
    fn icon_attribute_only_when_icon_landed() {
        let tmp = tempdir().unwrap();
        let context = test_context(tmp.path());
        assert!(!render_manifest(&context).contains("android:icon"));

        let drawable = context.paths.res_dir().join("drawable");
        std::fs::create_dir_all(&drawable).unwrap();
        std::fs::write(drawable.join("ic_launcher.png"), b"png").unwrap();
        assert!(render_manifest(&context).contains(r#"android:icon="@drawable/ic_launcher""#));
    }

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape_xml(r#"a<b>&"c""#), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
