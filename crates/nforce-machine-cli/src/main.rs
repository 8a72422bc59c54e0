#![forbid(unsafe_code)]

// Native-only front end; the stub keeps `--target wasm32-unknown-unknown --workspace` builds
// compiling.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::fs;
    use std::path::PathBuf;

    use anyhow::{bail, Context, Result};
    use clap::{Parser, ValueEnum};
    use nforce_machine::{
        AcceptAllFactory, AccelMode, DriveConfig, DriveMedia, MachineConfig, MachineTopology,
        MachineTopologyBuilder, MACHINE_TYPES,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
    enum Accel {
        /// Pure software emulation.
        Tcg,
        /// Hardware-assisted virtualization.
        Kvm,
    }

    impl From<Accel> for AccelMode {
        fn from(value: Accel) -> Self {
            match value {
                Accel::Tcg => AccelMode::Software,
                Accel::Kvm => AccelMode::HardwareAssisted,
            }
        }
    }

    #[derive(Debug, Parser)]
    #[command(about = "Builds an nForce PC machine topology and prints it (startup dry run)")]
    pub struct Args {
        /// JSON machine configuration file. Flags given on the command line override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Machine type.
        #[arg(long)]
        machine: Option<String>,

        /// Guest RAM size in MiB.
        #[arg(long)]
        ram: Option<u64>,

        /// Number of CPUs.
        #[arg(long)]
        cpus: Option<u32>,

        /// CPU model (`pentium`, `pentium2`, `pentium3`, `qemu32`, `host`).
        #[arg(long)]
        cpu: Option<String>,

        /// Acceleration mode.
        #[arg(long, value_enum)]
        accel: Option<Accel>,

        /// NIC model; the board only has the on-board `nvnet`.
        #[arg(long)]
        nic_model: Option<String>,

        /// Host network backend the on-board NIC is bound to.
        #[arg(long)]
        netdev: Option<String>,

        /// NIC MAC address (`xx:xx:xx:xx:xx:xx`).
        #[arg(long, value_parser = parse_mac)]
        mac: Option<[u8; 6]>,

        /// IDE disk image backend for the primary master.
        #[arg(long)]
        hda: Option<String>,

        /// CD-ROM image backend for the secondary master.
        #[arg(long)]
        cdrom: Option<String>,

        /// Print the topology as JSON instead of a bus tree.
        #[arg(long)]
        json: bool,

        /// List registered machine types and exit.
        #[arg(long)]
        list_machines: bool,
    }

    fn parse_mac(s: &str) -> Result<[u8; 6]> {
        let mut mac = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut mac {
            let part = parts.next().context("MAC address needs six octets")?;
            *byte = u8::from_str_radix(part, 16)
                .with_context(|| format!("invalid MAC octet `{part}`"))?;
        }
        if parts.next().is_some() {
            bail!("MAC address has more than six octets");
        }
        Ok(mac)
    }

    fn load_config(args: &Args) -> Result<MachineConfig> {
        let mut cfg = match &args.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => MachineConfig::default(),
        };

        if let Some(machine) = &args.machine {
            cfg.machine = machine.clone();
        }
        if let Some(ram) = args.ram {
            cfg.ram_size_bytes = ram.checked_mul(1024 * 1024).context("RAM size overflow")?;
        }
        if let Some(cpus) = args.cpus {
            cfg.cpu_count = cpus;
        }
        if let Some(cpu) = &args.cpu {
            cfg.cpu_model = Some(cpu.clone());
        }
        if let Some(accel) = args.accel {
            cfg.accel = accel.into();
        }
        if let Some(model) = &args.nic_model {
            cfg.nic.model = Some(model.clone());
        }
        if let Some(netdev) = &args.netdev {
            cfg.nic.netdev = Some(netdev.clone());
        }
        if let Some(mac) = args.mac {
            cfg.nic.mac = Some(mac);
        }
        if let Some(backend) = &args.hda {
            cfg.drives.push(DriveConfig {
                channel: 0,
                unit: 0,
                media: DriveMedia::Disk,
                backend: Some(backend.clone()),
            });
        }
        if let Some(backend) = &args.cdrom {
            cfg.drives.push(DriveConfig {
                channel: 1,
                unit: 0,
                media: DriveMedia::Cdrom,
                backend: Some(backend.clone()),
            });
        }
        Ok(cfg)
    }

    fn print_tree(topo: &MachineTopology) {
        let options = topo.options();
        let profile = topo.profile();
        println!("{} ({})", options.name, options.desc);
        println!(
            "cpu: {} x{}  strategy: {:?}  ram: {} MiB",
            profile.cpu_model().name(),
            profile.cpu_count(),
            profile.strategy(),
            profile.ram_size_bytes() / (1024 * 1024)
        );
        for region in topo.address_space().regions() {
            println!(
                "region {:<14} {:?} base={:#x} size={:#x} prio={}",
                region.name(),
                region.container(),
                region.base(),
                region.size(),
                region.priority()
            );
        }
        for bus in topo.buses().iter() {
            println!("bus {} ({:?})", bus.name(), bus.kind());
            for (address, id) in bus.devices() {
                if let Some(dev) = topo.device(*id) {
                    println!("  {:<8} {}", address.to_string(), dev.type_name());
                }
            }
        }
        let router = topo.interrupts();
        for line in router.lines() {
            if let Some(source) = line.source.and_then(|id| topo.device(id)) {
                println!("gsi {:>2} <- {}", line.index, source.label());
            }
        }
        if let (Some(line), Some(cpu)) = (
            router.ferr_line(),
            router.ferr_source().and_then(|id| topo.device(id)),
        ) {
            println!("gsi {:>2} <- {} (FERR#)", line, cpu.label());
        }
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();

        let args = Args::parse();
        if args.list_machines {
            for machine in MACHINE_TYPES {
                println!("{:<12} {}", machine.options.name, machine.options.desc);
            }
            return Ok(());
        }

        let cfg = load_config(&args)?;
        let topo = MachineTopologyBuilder::new(cfg)
            .build(&mut AcceptAllFactory)
            .context("failed to build machine topology")?;

        if args.json {
            let json = serde_json::to_string_pretty(&topo.summary())
                .context("failed to serialize topology")?;
            println!("{json}");
        } else {
            print_tree(&topo);
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
