use std::path::Path;

use boxjumper::audit::AuditLog;
use boxjumper::config::ConfigLoader;
use boxjumper::credentials::StaticCredentials;
use boxjumper::orchestrator::{Orchestrator, RunSettings};
use boxjumper::session::scripted::{Script, ScriptedConnector};

fn script() -> Script {
    Script::new()
        .reply("ssh ", ["Warning: Permanently added host\r\n", "ops@host's password: "])
        .reply("show a", ["show a\r\nA$ "])
        .reply("show b", ["show b\r\nB$ "])
        .reply("show c", ["show c\r\nC$ "])
        .fallback(["\r\nLast login: today\r\n$ "])
}

fn hop(dir: &Path, node: &str, jump_cmd: &str) -> String {
    let lower = node.to_lowercase();
    let cmd_file = dir.join(format!("{lower}.txt"));
    std::fs::write(&cmd_file, format!("# commands for {node}\nshow {lower}\n")).unwrap();
    format!(
        "jump_cmd = {jump_cmd}\nnode = {node}\nusername = ops\npassword = pw\ncmd_timeout = 0.2\ncmd_file = {}\nend\n\n",
        cmd_file.display()
    )
}

fn settings(dir: &Path) -> RunSettings {
    RunSettings {
        output_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn sent_commands(connector: &ScriptedConnector) -> Vec<String> {
    connector
        .transcript()
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("show"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn innermost_hop_runs_its_commands_first() {
    let dir = tempfile::tempdir().unwrap();
    let config = [
        hop(dir.path(), "A", "ssh"),
        hop(dir.path(), "B", "ssh"),
        hop(dir.path(), "C", "ssh"),
    ]
    .concat();
    let entries = ConfigLoader::default().load_str(&config);
    assert_eq!(entries.len(), 3);

    let connector = ScriptedConnector::new(script());
    let credentials = StaticCredentials::default();
    let orchestrator = Orchestrator::new(&connector, &credentials, settings(dir.path()));
    let mut audit = AuditLog::in_memory();

    let report = orchestrator.run(entries, &mut audit).await.unwrap();

    assert_eq!(sent_commands(&connector), vec!["show c", "show b", "show a"]);
    assert_eq!(
        audit.lines(),
        vec![
            "Accessing A",
            "Accessing B",
            "Accessing C",
            "Executing commands on C",
            "Leaving C",
            "Executing commands on B",
            "Leaving B",
            "Executing commands on A",
            "Leaving A",
        ]
    );

    // C runs on the chain's shell, B and A each on a fresh one.
    let transports = connector.transports();
    assert_eq!(transports.len(), 1);
    assert_eq!(transports[0].shells_opened(), 3);
    assert!(transports[0].is_closed());

    assert_eq!(report.outputs.len(), 3);
    let outputs: Vec<String> = report
        .outputs
        .iter()
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect();
    assert_eq!(outputs, vec!["show a\r\nA$ ", "show b\r\nB$ ", "show c\r\nC$ "]);
}

#[tokio::test(start_paused = true)]
async fn reset_shell_walks_back_to_its_hop() {
    let dir = tempfile::tempdir().unwrap();
    let config = [hop(dir.path(), "A", "ssh"), hop(dir.path(), "B", "ssh"), hop(dir.path(), "C", "ssh")].concat();
    let connector = ScriptedConnector::new(script());
    let credentials = StaticCredentials::default();
    let orchestrator = Orchestrator::new(&connector, &credentials, settings(dir.path()));

    orchestrator
        .run(ConfigLoader::default().load_str(&config), &mut AuditLog::in_memory())
        .await
        .unwrap();

    let lines = connector.transcript().lines();
    let show_b = lines.iter().position(|l| l == "show b").unwrap();
    // B's fresh shell re-enters B right before its command.
    assert_eq!(lines[show_b - 2], "ssh -o 'StrictHostKeyChecking no' ops@B -p 22");
    assert_eq!(lines[show_b - 1], "pw");
}

#[tokio::test(start_paused = true)]
async fn failed_jump_stops_before_any_command_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = [
        hop(dir.path(), "A", "ssh"),
        hop(dir.path(), "B", "rlogin"),
        hop(dir.path(), "C", "ssh"),
    ]
    .concat();
    let connector = ScriptedConnector::new(script());
    let credentials = StaticCredentials::default();
    let orchestrator = Orchestrator::new(&connector, &credentials, settings(dir.path()));
    let audit_path = dir.path().join("boxjumper.log");
    let mut audit = AuditLog::create(&audit_path).await.unwrap();

    let err = orchestrator
        .run(ConfigLoader::default().load_str(&config), &mut audit)
        .await
        .unwrap_err();
    audit.close().await.unwrap();

    assert_eq!(err.failed_node(), Some("B"));
    assert!(err.to_string().contains("rlogin not supported"));
    assert!(sent_commands(&connector).is_empty());
    assert!(connector.transports()[0].is_closed());
    assert_eq!(
        std::fs::read_to_string(&audit_path).unwrap(),
        "Accessing A\nAccessing B\n"
    );
}
