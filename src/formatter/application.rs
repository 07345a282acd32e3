use crate::formatter::MarkdownContent;
use crate::types::ApplicationSummary;

const UNKNOWN: &str = "Unknown";

pub fn application_summary_markdown(app: &ApplicationSummary) -> MarkdownContent {
    let mut content = String::new();

    content.push_str(&format!("## {}\n", app.name));
    if let Some(namespace) = &app.namespace {
        content.push_str(&format!("- Namespace: {}\n", namespace));
    }
    if let Some(project) = &app.project {
        content.push_str(&format!("- Project: {}\n", project));
    }
    content.push_str(&format!(
        "- Sync: {}\n",
        app.sync_status.as_deref().unwrap_or(UNKNOWN)
    ));
    content.push_str(&format!(
        "- Health: {}\n",
        app.health_status.as_deref().unwrap_or(UNKNOWN)
    ));

    // Source
    if let Some(repo_url) = &app.repo_url {
        let revision = app.target_revision.as_deref().unwrap_or("HEAD");
        content.push_str(&format!("- Source: {} @ {}\n", repo_url, revision));
    }
    if let Some(destination) = &app.destination_namespace {
        content.push_str(&format!("- Destination namespace: {}\n", destination));
    }

    MarkdownContent(content)
}

pub fn application_list_markdown(apps: &[ApplicationSummary]) -> MarkdownContent {
    if apps.is_empty() {
        return MarkdownContent("No applications found.\n".to_string());
    }

    let mut content = format!("# Applications ({})\n\n", apps.len());
    for app in apps {
        content.push_str(&application_summary_markdown(app).0);
        content.push('\n');
    }
    MarkdownContent(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ApplicationName;

    fn summary(name: &str) -> ApplicationSummary {
        ApplicationSummary {
            name: ApplicationName::from(name),
            namespace: Some("argocd".to_string()),
            project: Some("default".to_string()),
            sync_status: Some("OutOfSync".to_string()),
            health_status: None,
            repo_url: Some("https://github.com/argoproj/argocd-example-apps".to_string()),
            target_revision: None,
            destination_namespace: None,
        }
    }

    #[test]
    fn test_summary_markdown() {
        let markdown = application_summary_markdown(&summary("guestbook")).0;
        assert!(markdown.starts_with("## guestbook\n"));
        assert!(markdown.contains("- Sync: OutOfSync\n"));
        assert!(markdown.contains("- Health: Unknown\n"));
        assert!(markdown.contains("argocd-example-apps @ HEAD"));
    }

    #[test]
    fn test_list_markdown() {
        assert_eq!(
            application_list_markdown(&[]).0,
            "No applications found.\n"
        );
        let markdown = application_list_markdown(&[summary("a"), summary("b")]).0;
        assert!(markdown.starts_with("# Applications (2)"));
        assert!(markdown.contains("## a\n") && markdown.contains("## b\n"));
    }
}
