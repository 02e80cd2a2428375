use std::env;
use std::path::PathBuf;
use std::process::Command;

const WRITHE_KERNEL_SRC: &str = "kernels/cuda/writhe_kernel.cu";
const WRITHE_KERNEL_PTX: &str = "writhe_kernel.ptx";
const DEFAULT_ARCH: &str = "compute_89";
const FALLBACK_ARCH: &str = "compute_80";

fn main() {
    // Only compile PTX when the crate feature `cuda` is enabled.
    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        compile_cuda_kernels();
    } else {
        println!("cargo:warning=feature `cuda` not enabled; skipping PTX build");
    }
}

fn compile_cuda_kernels() {
    println!("cargo:rerun-if-changed=kernels/cuda");
    println!("cargo:rerun-if-env-changed=CUDA_ARCH");
    println!("cargo:rerun-if-env-changed=CUDA_ARCHS");
    println!("cargo:rerun-if-env-changed=CUDA_KERNEL_DIR");
    println!("cargo:rerun-if-env-changed=NVCC");
    println!("cargo:rerun-if-env-changed=NVCC_ARGS");
    println!("cargo:rerun-if-env-changed=CUDA_DEBUG");
    println!("cargo:rerun-if-env-changed=CUDA_FAST_MATH");

    let cuda_path = find_cuda_path();
    // PTX is JIT-loaded at runtime; no cudart linkage.
    compile_kernel(&cuda_path, WRITHE_KERNEL_SRC, WRITHE_KERNEL_PTX);
}

fn find_cuda_path() -> String {
    env::var("CUDA_PATH")
        .or_else(|_| env::var("CUDA_HOME"))
        .unwrap_or_else(|_| {
            if cfg!(target_os = "windows") {
                let base = "C:/Program Files/NVIDIA GPU Computing Toolkit/CUDA";
                let mut best: Option<(u32, u32, String)> = None;
                if let Ok(entries) = std::fs::read_dir(base) {
                    for e in entries.flatten() {
                        let Ok(name) = e.file_name().into_string() else { continue };
                        // "v13.0", "v12.3"
                        let Some(stripped) = name.strip_prefix('v') else { continue };
                        let mut it = stripped.split('.');
                        let Some(major) = it.next().and_then(|s| s.parse::<u32>().ok()) else {
                            continue;
                        };
                        let minor = it.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
                        let newer = match &best {
                            Some((bm, bn, _)) => (major, minor) > (*bm, *bn),
                            None => true,
                        };
                        if newer {
                            best = Some((major, minor, format!("{base}/{name}")));
                        }
                    }
                }
                match best {
                    Some((_, _, path)) => {
                        eprintln!("Found CUDA at: {}", path);
                        path
                    }
                    None => format!("{base}/v13.0"),
                }
            } else {
                "/usr/local/cuda".to_string()
            }
        })
}

// Accepts 89, 8.9, sm_89, compute_89
fn normalize_arch(s: &str) -> String {
    let t = s.trim();
    if t.is_empty() {
        return String::new();
    }
    if let Some(rest) = t.strip_prefix("sm_") {
        return format!("compute_{rest}");
    }
    if t.starts_with("compute_") {
        return t.to_string();
    }
    let digits: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 2 {
        return format!("compute_{}", &digits[0..2]);
    }
    t.to_string()
}

fn requested_arch() -> String {
    let from_list = env::var("CUDA_ARCHS").ok().and_then(|list| {
        list.split(|c: char| c == ',' || c.is_ascii_whitespace())
            .find(|t| !t.trim().is_empty())
            .map(normalize_arch)
    });
    from_list
        .or_else(|| env::var("CUDA_ARCH").ok().map(|a| normalize_arch(&a)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ARCH.to_string())
}

fn nvcc_command(nvcc: &str, arch: &str, ptx_path: &str, src_path: &str) -> Command {
    let mut cmd = Command::new(nvcc);
    cmd.args(["-std=c++17", "--expt-relaxed-constexpr", "-ptx", "-O3"]);

    // The writhe kernel needs full-precision asin/rsqrt; CUDA_FAST_MATH=1 opts in anyway.
    if env::var("CUDA_FAST_MATH").ok().as_deref() == Some("1") {
        cmd.arg("--use_fast_math");
    }
    if env::var("CUDA_DEBUG").ok().as_deref() == Some("1") {
        cmd.arg("-lineinfo");
    }

    cmd.args(["-arch", arch, "-o", ptx_path, src_path]);

    if let Ok(extra) = env::var("NVCC_ARGS") {
        for tok in extra.split_whitespace() {
            cmd.arg(tok);
        }
    }

    if cfg!(target_os = "windows") {
        cmd.arg("-D_ALLOW_COMPILER_AND_STL_VERSION_MISMATCH");
        cmd.arg("-allow-unsupported-compiler");
        if let Ok(vs_path) = find_vs_installation() {
            cmd.arg("-ccbin").arg(vs_path);
        }
    }
    cmd
}

fn compile_kernel(cuda_path: &str, rel_src: &str, ptx_name: &str) {
    let src_path = match env::var("CUDA_KERNEL_DIR") {
        Ok(root) => match rel_src.strip_prefix("kernels/cuda/") {
            Some(rest) => format!("{}/{}", root.trim_end_matches(['/', '\\']), rest),
            None => rel_src.to_string(),
        },
        Err(_) => rel_src.to_string(),
    };
    println!("cargo:rerun-if-changed={}", src_path);

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let ptx_path = out_dir.join(ptx_name);
    let ptx_str = ptx_path.to_str().expect("ptx path");

    if cfg!(target_os = "windows") && env::var("VCINSTALLDIR").is_err() {
        eprintln!(
            "Warning: VCINSTALLDIR not set. CUDA compilation may require running inside a Visual Studio Developer Command Prompt."
        );
    }

    // NVCC env var wins; else cuda_path/bin/nvcc
    let nvcc = env::var("NVCC").unwrap_or_else(|_| {
        if cfg!(target_os = "windows") {
            format!("{}/bin/nvcc.exe", cuda_path)
        } else {
            format!("{}/bin/nvcc", cuda_path)
        }
    });

    let arch = requested_arch();
    let mut cmd = nvcc_command(&nvcc, &arch, ptx_str, &src_path);
    eprintln!("Running nvcc command: {:?}", cmd);
    let mut output = cmd.output().expect("Failed to execute nvcc");

    if !output.status.success() {
        let err_s = String::from_utf8_lossy(&output.stderr);
        let out_s = String::from_utf8_lossy(&output.stdout);
        let maybe_arch_fail = err_s.contains("unsupported gpu architecture")
            || err_s.contains("Value 'compute_")
            || out_s.contains("unsupported gpu architecture");
        if arch != FALLBACK_ARCH && maybe_arch_fail {
            eprintln!(
                "Falling back to -arch={FALLBACK_ARCH} for {rel_src} (nvcc doesn't support {arch})"
            );
            let mut cmd2 = nvcc_command(&nvcc, FALLBACK_ARCH, ptx_str, &src_path);
            eprintln!("Running nvcc command: {:?}", cmd2);
            output = cmd2.output().expect("Failed to execute nvcc (fallback)");
        }
    }

    if !output.status.success() {
        eprintln!("CUDA compilation failed for {rel_src}!");
        eprintln!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        eprintln!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        if cfg!(target_os = "windows")
            && String::from_utf8_lossy(&output.stderr).contains("Cannot find compiler 'cl.exe'")
        {
            eprintln!("\n=== CUDA Build Error: Missing Visual Studio C++ Compiler ===");
            eprintln!("nvcc requires the Microsoft Visual C++ compiler (cl.exe) to be available.");
            eprintln!("Install Visual Studio Build Tools 2022 or run cargo from a Developer Command Prompt.");
            eprintln!("===========================================================\n");
        }
        panic!("nvcc compilation failed");
    }

    println!("Successfully compiled {} to {}", src_path, ptx_path.display());
}

#[cfg(target_os = "windows")]
fn find_vs_installation() -> Result<String, ()> {
    let vs_paths = [
        "C:/Program Files/Microsoft Visual Studio/2022/Community/VC/Tools/MSVC",
        "C:/Program Files/Microsoft Visual Studio/2022/Professional/VC/Tools/MSVC",
        "C:/Program Files/Microsoft Visual Studio/2022/Enterprise/VC/Tools/MSVC",
        "C:/Program Files (x86)/Microsoft Visual Studio/2022/BuildTools/VC/Tools/MSVC",
    ];
    for vs_base in &vs_paths {
        let Ok(entries) = std::fs::read_dir(vs_base) else { continue };
        if let Some(msvc_version) = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with("14."))
            .max()
        {
            let cl_path = format!("{}/{}/bin/Hostx64/x64", vs_base, msvc_version);
            if std::path::Path::new(&format!("{}/cl.exe", cl_path)).exists() {
                eprintln!("Found cl.exe at: {}", cl_path);
                return Ok(cl_path);
            }
        }
    }
    Err(())
}

#[cfg(not(target_os = "windows"))]
fn find_vs_installation() -> Result<String, ()> {
    Err(())
}
