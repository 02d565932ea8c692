// CLI definitions using clap derive macros
use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;

/// SIP OPTIONS ping over UDP
#[derive(Parser, Debug, PartialEq)]
#[command(name = "sipping", disable_version_flag = true)]
pub struct Cli {
    /// 宛先ホスト
    #[arg(short = 'd', value_name = "HOST")]
    pub dest_host: Option<String>,
    /// 宛先ポート
    #[arg(short = 'p', value_name = "PORT")]
    pub dest_port: Option<u16>,
    /// 送信元IPアドレス
    #[arg(short = 'S', value_name = "IP")]
    pub source_ip: Option<String>,
    /// 送信元ポート（0でエフェメラル）
    #[arg(short = 'P', value_name = "PORT")]
    pub source_port: Option<u16>,
    /// 送信回数（省略時は中断まで継続）
    #[arg(short = 'c', value_name = "COUNT")]
    pub count: Option<u64>,
    /// 送信間隔（秒）
    #[arg(short = 'i', value_name = "SECONDS")]
    pub interval: Option<f64>,
    /// 応答待ちタイムアウト（秒）
    #[arg(short = 'T', value_name = "SECONDS")]
    pub timeout: Option<f64>,
    /// テンプレート変数 name:value（繰り返し可、".name" は計算変数）
    #[arg(short = 'v', value_name = "NAME:VALUE")]
    pub variables: Vec<String>,
    /// 送受信メッセージを全文表示する
    #[arg(short = 'V')]
    pub verbose: bool,
    /// 送信ごとの表示と最終統計を抑制する
    #[arg(short = 'q')]
    pub quiet: bool,
    /// 応答を待たずに送信し続ける
    #[arg(short = 'a')]
    pub aggressive: bool,
    /// リクエストテンプレートファイル
    #[arg(short = 'r', value_name = "FILE")]
    pub request_template: Option<PathBuf>,
    /// デフォルトのリクエストテンプレートを表示して終了する
    #[arg(short = 't')]
    pub print_template: bool,
    /// 応答表示用の正規表現
    #[arg(short = 'O', value_name = "REGEX")]
    pub out_regex: Option<String>,
    /// 応答表示用の置換文字列
    #[arg(short = 'R', value_name = "REPLACEMENT")]
    pub out_replace: Option<String>,
    /// JSON設定ファイル（コマンドライン引数が優先）
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// JSON結果出力先
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,
}

impl Cli {
    /// Overlay the given flags on `base`. Boolean flags can only switch a
    /// setting on; variables are appended after the ones in `base`.
    pub fn into_config(self, base: Config) -> Config {
        let mut cfg = base;
        if let Some(host) = self.dest_host {
            cfg.dest_host = Some(host);
        }
        if let Some(port) = self.dest_port {
            cfg.dest_port = port;
        }
        if let Some(ip) = self.source_ip {
            cfg.source_ip = ip;
        }
        if let Some(port) = self.source_port {
            cfg.source_port = port;
        }
        if self.count.is_some() {
            cfg.count = self.count;
        }
        if let Some(interval) = self.interval {
            cfg.interval_secs = interval;
        }
        if let Some(timeout) = self.timeout {
            cfg.timeout_secs = timeout;
        }
        cfg.variables.extend(self.variables);
        cfg.verbose |= self.verbose;
        cfg.quiet |= self.quiet;
        cfg.aggressive |= self.aggressive;
        if self.request_template.is_some() {
            cfg.request_template = self.request_template;
        }
        if self.out_regex.is_some() {
            cfg.out_regex = self.out_regex;
        }
        if self.out_replace.is_some() {
            cfg.out_replace = self.out_replace;
        }
        cfg
    }
}
