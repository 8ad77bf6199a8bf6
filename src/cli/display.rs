//! User-facing console output.

use console::style;

use crate::config::ToolInfo;
use crate::rotation::Reporter;

/// Print the startup banner.
pub fn print_banner(tool: &ToolInfo) {
    let title = format!("{} v{}", tool.name, tool.version);
    let rule = "=".repeat(title.len() + 8);
    println!();
    println!("{}", style(&rule).cyan());
    println!("    {}", style(&title).cyan().bold());
    println!("{}", style(&rule).cyan());
    println!("{}", style("  Automate IP address changes using Tor").dim());
    println!();
}

/// Print guidance after tor has been started.
pub fn print_start_message() {
    println!(
        " [{}] {}",
        style("+").green(),
        style("Tor service started. Please wait a minute for Tor to connect.").green()
    );
    println!(
        " [{}] {}",
        style("*").cyan(),
        style("Make sure to configure your browser to use Tor for anonymity.").cyan()
    );
}

/// Print the message shown when the program is interrupted.
pub fn print_terminated() {
    println!();
    println!(
        " [{}] {}",
        style("!").red(),
        style("Program terminated by user.").red()
    );
}

/// Lines of the address report: border, message, border.
fn ip_report_lines(ip: &str) -> [String; 3] {
    let message = format!("Your IP has been changed to: {}", ip);
    let border = "=".repeat(message.chars().count());
    [border.clone(), message, border]
}

/// Print a bordered address report.
pub fn print_ip(ip: &str) {
    println!();
    for line in ip_report_lines(ip) {
        println!(" [{}] {}", style("+").magenta(), style(line).magenta());
    }
    println!();
}

/// Reports rotated addresses on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, address: &str) {
        print_ip(address);
    }
}
